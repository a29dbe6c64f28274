//! The single entry point every discovery source funnels through: decides
//! eligibility, computes the local queue name with collision fallback, and
//! either inserts a new catalogue entry or updates an existing one.

use crate::catalogue::{Catalogue, CapabilityHints, DescriptionSource, EntryId, EntryStatus, RemotePrinterEntry, ServiceIdentity};
use crate::config::AppConfig;
use crate::description;
use crate::errors::Result;
use crate::local_view::LocalPrinterView;
use crate::print_service::PrintServiceClient;

/// Page-description languages acceptable for a direct network printer when
/// no description file can be synthesised.
const ACCEPTABLE_PDLS: &[&str] =
    &["application/postscript", "application/pdf", "image/pwg-raster", "application/vnd.hp-PCL", "application/vnd.hp-PCLXL"];

#[derive(Debug, Clone, Default)]
pub struct TxtRecord {
    pub rp: Option<String>,
    pub product: Option<String>,
    pub ty: Option<String>,
    pub usb_mdl: Option<String>,
    pub pdl: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IntakeEvent {
    /// A resolved mDNS/DNS-SD service or a poll worker's full
    /// enumeration re-expressed the same way (the scheme is always unsecured
    /// for poll-sourced entries, since `Get-Printers` doesn't report it).
    ServiceDiscovery {
        host: String,
        port: u16,
        resource: String,
        secured: bool,
        identity: ServiceIdentity,
        txt: Option<TxtRecord>,
    },
    /// A legacy UDP browse packet, already Allow-List-checked.
    Broadcast { uri: String },
}

fn sanitize(raw: &str, extra_allowed: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for c in raw.chars() {
        let allowed = c.is_ascii_alphanumeric() || c == '_' || extra_allowed.contains(c);
        if allowed {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

pub fn sanitize_name(raw: &str) -> String {
    let s = sanitize(raw, "");
    if s.is_empty() {
        "printer".to_string()
    } else {
        s
    }
}

pub fn sanitize_pdl(raw: &str) -> String {
    sanitize(raw, "/.,")
}

/// Strip a trailing `.local` or `.local.` suffix — the trailing-dot form
/// must be checked first, or a hostname like `printer.local.` would be left
/// with a dangling dot.
pub fn sanitize_host(host: &str) -> String {
    host.strip_suffix(".local.").or_else(|| host.strip_suffix(".local")).unwrap_or(host).to_string()
}

struct Classified {
    shared: bool,
    local_name: String,
}

fn classify(resource: &str, txt_product: Option<&str>) -> Option<Classified> {
    let lower = resource.to_ascii_lowercase();
    if lower.starts_with("printers/") || lower.starts_with("classes/") {
        let tail = resource.splitn(2, '/').nth(1).unwrap_or("printer");
        Some(Classified { shared: true, local_name: sanitize_name(tail) })
    } else {
        let model = txt_product.unwrap_or("printer");
        Some(Classified { shared: false, local_name: sanitize_name(model) })
    }
}

fn extract_parenthesized(product: &str) -> Option<String> {
    let start = product.find('(')?;
    let end = product.rfind(')')?;
    if end > start {
        Some(product[start + 1..end].to_string())
    } else {
        None
    }
}

fn split_resource_from_uri(uri: &str) -> (String, String) {
    // ipp://host:port/resource -> (host, resource)
    let without_scheme = uri.splitn(2, "://").nth(1).unwrap_or(uri);
    let mut parts = without_scheme.splitn(2, '/');
    let authority = parts.next().unwrap_or_default();
    let resource = parts.next().unwrap_or_default().to_string();
    let host = authority.split(':').next().unwrap_or_default().to_string();
    (host, resource)
}

pub struct IntakeResult {
    pub entry_id: Option<EntryId>,
    pub rejected_reason: Option<&'static str>,
}

/// Run one discovery event through the intake pipeline. Mutates the
/// catalogue in place; talks to the print service only for the collision
/// check (refresh) and, for brand-new direct-printer entries, to fetch
/// attributes for description synthesis.
pub async fn intake(
    event: IntakeEvent,
    catalogue: &mut Catalogue,
    local_view: &mut LocalPrinterView,
    client: &dyn PrintServiceClient,
    cfg: &AppConfig,
    now: u64,
) -> Result<IntakeResult> {
    let rejected = |reason: &'static str| Ok(IntakeResult { entry_id: None, rejected_reason: Some(reason) });

    // Legacy-broadcast and poll-worker events both arrive in the same
    // "broadcast shape" (no service identity) and are both subject to the
    // browse-timeout lease in §4.8: the entry must be re-asserted before the
    // lease expires or it is retired, unlike a service-discovery entry which
    // is confirmed outright and stays confirmed until an explicit REMOVE.
    let broadcast_origin = matches!(event, IntakeEvent::Broadcast { .. });

    let (uri, host, resource, identity, txt) = match event {
        IntakeEvent::ServiceDiscovery { host, port, resource, secured, identity, txt } => {
            let scheme = if secured { "ipps" } else { "ipp" };
            let uri = format!("{scheme}://{host}:{port}/{resource}");
            (uri, sanitize_host(&host), resource, identity, txt)
        }
        IntakeEvent::Broadcast { uri } => {
            let (host, resource) = split_resource_from_uri(&uri);
            (uri, sanitize_host(&host), resource, ServiceIdentity::default(), None)
        }
    };

    let product = txt.as_ref().and_then(|t| t.product.as_deref());
    let classified = match classify(&resource, product) {
        Some(c) => c,
        None => return rejected("unclassifiable resource"),
    };

    let mut capability_hints = None;
    if classified.shared {
        if let Some(t) = &txt {
            let has_description = t.product.as_deref().and_then(extract_parenthesized).is_some();
            if !has_description {
                return rejected("shared queue has no description (missing product=(...))");
            }
        }
    } else {
        let model = txt.as_ref().and_then(|t| t.ty.as_deref().or(t.usb_mdl.as_deref()).or(product).map(str::to_string));
        let pdl_list: Vec<String> = txt
            .as_ref()
            .and_then(|t| t.pdl.as_deref())
            .map(|s| s.split(',').map(|p| sanitize_pdl(p.trim())).collect())
            .unwrap_or_default();
        let usable_pdl = pdl_list.iter().any(|p| ACCEPTABLE_PDLS.iter().any(|a| p.eq_ignore_ascii_case(a)));

        // Reject iff the daemon is neither configured to create direct-printer
        // queues nor is a usable PDL advertised — matching §4.6 step 5's
        // literal "neither … nor …" wording, not a narrower AND of the two.
        if !cfg.create_ipp_printer_queues && !usable_pdl {
            return rejected("direct-printer queue creation disabled and no acceptable page-description language advertised");
        }
        capability_hints = Some(CapabilityHints { pdl: pdl_list, make_and_model: model });
    }

    let primary_name = classified.local_name;

    local_view.refresh(client).await.ok();

    if local_view.contains_uri(&uri) && catalogue.find_for_intake(&primary_name, &host).is_none() {
        return rejected("URI already owned by an existing local queue");
    }

    let name = resolve_name_collision(&primary_name, &host, local_view);
    let name = match name {
        Some(n) => n,
        None => return rejected("name and fallback name both taken by external queues"),
    };

    if let Some(id) = catalogue.find_for_intake(&name, &host) {
        let scheme_and_tail_changed = {
            let existing = catalogue.get(id).unwrap();
            existing.uri != uri
        };
        let entry = catalogue.get_mut(id).unwrap();
        if scheme_and_tail_changed {
            entry.uri = uri;
            entry.host = host;
            entry.identity = identity;
            entry.status = if broadcast_origin { EntryStatus::BrowsePacketReceived } else { EntryStatus::ToBeCreated };
            entry.deadline = Some(now);
        } else if broadcast_origin && entry.status == EntryStatus::Disappeared {
            // This entry's local queue already exists and is sitting under a
            // browse-timeout lease (it got here via a prior BROWSE_PACKET_RECEIVED
            // create). A fresh broadcast/poll-keepalive re-assertion pushes the
            // lease out again rather than confirming the entry outright — it
            // must keep re-asserting every cycle or be retired (§4.8).
            entry.deadline = Some(now + cfg.browse_timeout_secs);
        } else if matches!(entry.status, EntryStatus::Unconfirmed | EntryStatus::Disappeared) {
            entry.status = EntryStatus::Confirmed;
            entry.deadline = None;
            if entry.identity.is_empty() {
                entry.identity = identity;
            }
        }
        return Ok(IntakeResult { entry_id: Some(id), rejected_reason: None });
    }

    let duplicate = catalogue.find_primary_by_name(&name, None).is_some();

    // A duplicate never reaches the reconciler's create step (see below), so
    // don't synthesise a description artefact for it — there's nothing to
    // clean the temp file up afterwards.
    let description_source = if classified.shared || duplicate {
        DescriptionSource::Raw
    } else {
        build_description(client, &uri, &capability_hints).await.unwrap_or(DescriptionSource::Raw)
    };

    // A duplicate is a standby placeholder, never scheduled for its own
    // reconciler action ("deadline = none <=> entry is in a steady
    // state (CONFIRMED or duplicate)") — only the disappearance protocol
    // promotes it, at which point it gets a fresh deadline of its own.
    //
    // A broadcast/poll-origin entry starts life as BROWSE_PACKET_RECEIVED
    // rather than TO_BE_CREATED, so that the reconciler's create step knows
    // to drop it under a browse-timeout lease (DISAPPEARED + BROWSE_TIMEOUT)
    // instead of confirming it outright once the queue is created.
    let status = if broadcast_origin { EntryStatus::BrowsePacketReceived } else { EntryStatus::ToBeCreated };
    let entry = RemotePrinterEntry {
        name,
        uri,
        host,
        identity,
        status,
        deadline: if duplicate { None } else { Some(now) },
        duplicate,
        description_source,
        capability_hints,
    };
    let id = catalogue.insert(entry);
    Ok(IntakeResult { entry_id: Some(id), rejected_reason: None })
}

async fn build_description(
    client: &dyn PrintServiceClient,
    uri: &str,
    hints: &Option<CapabilityHints>,
) -> Option<DescriptionSource> {
    let attrs = client.get_printer_attributes(uri).await.ok()?;
    let model = hints.as_ref().and_then(|h| h.make_and_model.clone()).unwrap_or_else(|| "printer".to_string());
    if let Ok(Some(path)) = description::synthesize_description_file(&attrs, &model) {
        return Some(DescriptionSource::DescriptionFile(path));
    }
    let pdl = hints.as_ref().and_then(|h| h.pdl.first().cloned()).unwrap_or_else(|| "application/pdf".to_string());
    description::write_interface_script(&pdl, &model).ok().map(DescriptionSource::InterfaceScript)
}

/// Collision fallback: `"<name>"`, else `"<name>@<host>"`, else reject
/// . A local queue already tracked by the catalogue is not
/// a collision — only an *externally* owned queue blocks a name.
fn resolve_name_collision(name: &str, host: &str, local_view: &LocalPrinterView) -> Option<String> {
    match local_view.get(name) {
        Some(local) if !local.daemon_controlled => {
            let fallback = format!("{name}@{host}");
            match local_view.get(&fallback) {
                Some(l2) if !l2.daemon_controlled => None,
                _ => Some(fallback),
            }
        }
        _ => Some(name.to_string()),
    }
}
