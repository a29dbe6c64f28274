//! The reconciler pass: for every catalogue entry whose deadline has
//! elapsed, drive the state-machine action dictated by its current status.

use tracing::{info, warn};

use crate::catalogue::{Catalogue, DescriptionSource, EntryId, EntryStatus, ServiceIdentity};
use crate::config::AppConfig;
use crate::local_view::LocalPrinterView;
use crate::print_service::{AddModifyRequest, PrintServiceClient};

pub struct Reconciler<'a> {
    pub catalogue: &'a mut Catalogue,
    pub local_view: &'a mut LocalPrinterView,
    pub client: &'a dyn PrintServiceClient,
    pub cfg: &'a AppConfig,
}

impl<'a> Reconciler<'a> {
    /// Run one pass over the whole catalogue. Returns the next deadline to
    /// schedule a reconcile timer for, if any.
    pub async fn run_pass(&mut self, now: u64) -> Option<u64> {
        self.local_view.inhibit();
        // Collect ids up front: the reconciler removes entries mid-iteration,
        // so it iterates a snapshot of ids, not the live map, meaning
        // removal never invalidates the cursor.
        let ids: Vec<EntryId> = self.catalogue.ids();
        for id in ids {
            self.step(id, now).await;
        }
        self.local_view.uninhibit();
        self.catalogue.next_deadline()
    }

    async fn step(&mut self, id: EntryId, now: u64) {
        let Some(entry) = self.catalogue.get(id) else { return };
        if !entry.is_due(now) && !matches!(entry.status, EntryStatus::Disappeared if entry.duplicate) {
            return;
        }

        match entry.status {
            EntryStatus::Unconfirmed => {
                let entry = self.catalogue.get_mut(id).unwrap();
                entry.status = EntryStatus::Disappeared;
                entry.deadline = Some(now);
                self.step_disappeared(id, now).await;
            }
            EntryStatus::Disappeared => self.step_disappeared(id, now).await,
            EntryStatus::ToBeCreated | EntryStatus::BrowsePacketReceived => self.step_create(id, now).await,
            EntryStatus::Confirmed => {}
        }
    }

    async fn step_disappeared(&mut self, id: EntryId, now: u64) {
        let duplicate = self.catalogue.get(id).map(|e| e.duplicate).unwrap_or(false);
        if duplicate {
            self.catalogue.remove(id);
            return;
        }

        let name = self.catalogue.get(id).unwrap().name.clone();

        match self.client.has_active_jobs(&name).await {
            Ok(true) => {
                self.retry_later(id, now, "active jobs pending");
                return;
            }
            Err(e) => {
                warn!(printer = %name, error = %e, "local print service unreachable; will retry");
                self.retry_later(id, now, "print service unreachable");
                return;
            }
            Ok(false) => {}
        }

        match self.client.get_default().await {
            Ok(Some(default)) if default.eq_ignore_ascii_case(&name) => {
                self.retry_later(id, now, "printer is the system default");
                return;
            }
            Err(e) => {
                warn!(printer = %name, error = %e, "local print service unreachable; will retry");
                self.retry_later(id, now, "print service unreachable");
                return;
            }
            _ => {}
        }

        match self.client.delete_printer(&name).await {
            Ok(()) => {
                info!(printer = %name, "removed local queue for disappeared remote printer");
                self.catalogue.remove(id);
            }
            Err(e) => {
                warn!(printer = %name, error = %e, "CUPS-Delete-Printer failed; will retry");
                self.retry_later(id, now, "delete failed");
            }
        }
    }

    async fn step_create(&mut self, id: EntryId, now: u64) {
        let entering_from_browse = matches!(self.catalogue.get(id).unwrap().status, EntryStatus::BrowsePacketReceived);
        let (name, uri, make_and_model, ppd_path, script_path) = {
            let entry = self.catalogue.get(id).unwrap();
            let make_and_model = entry.capability_hints.as_ref().and_then(|h| h.make_and_model.clone());
            let (ppd, script) = match &entry.description_source {
                DescriptionSource::Raw => (None, None),
                DescriptionSource::DescriptionFile(p) => (Some(p.clone()), None),
                DescriptionSource::InterfaceScript(p) => (None, Some(p.clone())),
            };
            (entry.name.clone(), entry.uri.clone(), make_and_model, ppd, script)
        };

        let req = AddModifyRequest {
            name: name.clone(),
            device_uri: uri,
            make_and_model,
            ppd_path: ppd_path.clone(),
            interface_script_path: script_path.clone(),
            shared: false,
        };

        let result = self.client.add_modify_printer(req).await;

        if let Some(path) = ppd_path {
            let _ = std::fs::remove_file(path);
        }
        if let Some(path) = script_path {
            let _ = std::fs::remove_file(path);
        }

        match result {
            Ok(()) => {
                let entry = self.catalogue.get_mut(id).unwrap();
                if entering_from_browse {
                    entry.status = EntryStatus::Disappeared;
                    entry.deadline = Some(now + self.cfg.browse_timeout_secs);
                } else {
                    entry.status = EntryStatus::Confirmed;
                    entry.deadline = None;
                }
                info!(printer = %name, "local queue created/updated");
            }
            Err(e) => {
                warn!(printer = %name, error = %e, "CUPS-Add-Modify-Printer failed; will retry");
                self.retry_later(id, now, "add-modify failed");
            }
        }
    }

    fn retry_later(&mut self, id: EntryId, now: u64, reason: &'static str) {
        if let Some(entry) = self.catalogue.get_mut(id) {
            entry.deadline = Some(now + self.cfg.retry_secs);
            tracing::debug!(printer = %entry.name, reason, retry_in = self.cfg.retry_secs, "scheduling retry");
        }
    }

    /// Disappearance protocol for a service-discovery REMOVE event.
    /// `identity` is the removed service's identity tuple.
    pub fn handle_remove(&mut self, identity: &ServiceIdentity, now: u64, remove_delay_secs: i64) {
        let Some(id) = self.catalogue.find_by_identity(identity) else { return };
        let name = self.catalogue.get(id).unwrap().name.clone();
        let takeover = self.catalogue.find_duplicate_by_name(&name, Some(id));

        if let Some(dup_id) = takeover {
            let dup = self.catalogue.get(dup_id).unwrap().clone();
            if let Some(entry) = self.catalogue.get_mut(id) {
                entry.uri = dup.uri;
                entry.host = dup.host;
                entry.identity = dup.identity;
                entry.description_source = dup.description_source;
                entry.status = EntryStatus::ToBeCreated;
                entry.deadline = Some(now);
            }
            if let Some(entry) = self.catalogue.get_mut(dup_id) {
                entry.status = EntryStatus::Disappeared;
                entry.deadline = Some(now);
            }
        } else if let Some(entry) = self.catalogue.get_mut(id) {
            let delay = if remove_delay_secs < 0 { 0 } else { remove_delay_secs };
            entry.status = EntryStatus::Disappeared;
            entry.deadline = Some(now + delay as u64);
        }
    }
}
