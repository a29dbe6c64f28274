// End-to-end discovery scenarios: a resolved service-discovery advertisement
// flowing through intake and, where relevant, one reconciler pass against a
// fake local print service.

mod common;

use common::FakePrintService;

use cups_browsed_rs::catalogue::{Catalogue, EntryStatus, ServiceIdentity};
use cups_browsed_rs::config::AppConfig;
use cups_browsed_rs::intake::{intake, IntakeEvent, TxtRecord};
use cups_browsed_rs::local_view::LocalPrinterView;
use cups_browsed_rs::reconciler::Reconciler;

fn hplj_event(host: &str, service_name: &str) -> IntakeEvent {
    IntakeEvent::ServiceDiscovery {
        host: host.to_string(),
        port: 631,
        resource: "printers/hplj".to_string(),
        secured: false,
        identity: ServiceIdentity {
            service_name: service_name.to_string(),
            service_type: "_ipp._tcp.local.".to_string(),
            service_domain: "local".to_string(),
        },
        txt: Some(TxtRecord { rp: Some("printers/hplj".to_string()), product: Some("(HP LaserJet)".to_string()), ..Default::default() }),
    }
}

#[tokio::test]
async fn simple_discovery_creates_and_confirms_a_queue() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let result = intake(hplj_event("printer.local", "HPLJ._ipp._tcp.local."), &mut catalogue, &mut local_view, &client, &cfg, 1000)
        .await
        .unwrap();
    let id = result.entry_id.expect("advertisement should be accepted");

    {
        let entry = catalogue.get(id).unwrap();
        assert_eq!(entry.name, "hplj");
        assert_eq!(entry.uri, "ipp://printer.local:631/printers/hplj");
        assert_eq!(entry.host, "printer");
        assert_eq!(entry.status, EntryStatus::ToBeCreated);
    }

    let mut reconciler = Reconciler { catalogue: &mut catalogue, local_view: &mut local_view, client: &client, cfg: &cfg };
    reconciler.run_pass(1000).await;

    let entry = catalogue.get(id).unwrap();
    assert_eq!(entry.status, EntryStatus::Confirmed);
    assert!(entry.deadline.is_none());

    let calls = client.add_modify_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "hplj");
    assert_eq!(calls[0].device_uri, "ipp://printer.local:631/printers/hplj");
}

#[tokio::test]
async fn name_collision_falls_back_to_at_host_suffix() {
    let client = FakePrintService::new().with_existing_queue("hplj", "lpd://192.168.1.99/legacy", false);
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let result = intake(hplj_event("printer.local", "HPLJ._ipp._tcp.local."), &mut catalogue, &mut local_view, &client, &cfg, 1000)
        .await
        .unwrap();
    let id = result.entry_id.expect("advertisement should be accepted despite the collision");
    assert_eq!(catalogue.get(id).unwrap().name, "hplj@printer");

    let mut reconciler = Reconciler { catalogue: &mut catalogue, local_view: &mut local_view, client: &client, cfg: &cfg };
    reconciler.run_pass(1000).await;

    let calls = client.add_modify_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "hplj@printer");

    // The original external queue is untouched.
    let original = client.get_queue("hplj").unwrap();
    assert_eq!(original.device_uri, "lpd://192.168.1.99/legacy");
    assert!(!original.daemon_owned);
}

#[tokio::test]
async fn raw_shared_queue_without_description_is_rejected() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::ServiceDiscovery {
        host: "printer.local".to_string(),
        port: 631,
        resource: "printers/hplj".to_string(),
        secured: false,
        identity: ServiceIdentity {
            service_name: "HPLJ._ipp._tcp.local.".to_string(),
            service_type: "_ipp._tcp.local.".to_string(),
            service_domain: "local".to_string(),
        },
        // No `product=(...)` entry: the remote queue has no description file.
        txt: Some(TxtRecord { rp: Some("printers/hplj".to_string()), product: None, ..Default::default() }),
    };

    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    assert!(result.entry_id.is_none());
    assert!(result.rejected_reason.is_some());
    assert_eq!(catalogue.len(), 0);
    assert!(client.add_modify_calls().is_empty());
}

#[tokio::test]
async fn intake_is_idempotent_for_a_repeated_advertisement() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = hplj_event("printer.local", "HPLJ._ipp._tcp.local.");
    intake(event.clone(), &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();

    assert_eq!(catalogue.len(), 1, "re-advertising the same printer must not duplicate the catalogue entry");
}

#[tokio::test]
async fn broadcast_origin_entry_sits_under_a_browse_timeout_lease_after_creation() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::Broadcast { uri: "ipp://printer.local:631/printers/hplj".to_string() };
    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    let id = result.entry_id.expect("browse packet should be accepted");
    assert_eq!(catalogue.get(id).unwrap().status, EntryStatus::BrowsePacketReceived);

    let mut reconciler = Reconciler { catalogue: &mut catalogue, local_view: &mut local_view, client: &client, cfg: &cfg };
    reconciler.run_pass(1000).await;

    // Once created, a broadcast-origin entry goes under lease, not CONFIRMED:
    // it must keep re-asserting or the queue is retired.
    let entry = catalogue.get(id).unwrap();
    assert_eq!(entry.status, EntryStatus::Disappeared);
    assert_eq!(entry.deadline, Some(1000 + cfg.browse_timeout_secs));
}

#[tokio::test]
async fn broadcast_reassertion_refreshes_the_lease_instead_of_confirming() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::Broadcast { uri: "ipp://printer.local:631/printers/hplj".to_string() };
    let result = intake(event.clone(), &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    let id = result.entry_id.unwrap();

    let mut reconciler = Reconciler { catalogue: &mut catalogue, local_view: &mut local_view, client: &client, cfg: &cfg };
    reconciler.run_pass(1000).await;
    assert_eq!(catalogue.get(id).unwrap().status, EntryStatus::Disappeared);

    // A fresh broadcast arrives well before the lease expires.
    intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1200).await.unwrap();

    let entry = catalogue.get(id).unwrap();
    assert_eq!(entry.status, EntryStatus::Disappeared, "re-assertion must not flip the entry to Confirmed");
    assert_eq!(entry.deadline, Some(1200 + cfg.browse_timeout_secs));

    // The local queue is untouched: no delete was ever issued.
    assert!(client.deleted().is_empty());
}

#[tokio::test]
async fn broadcast_entry_is_retired_once_the_lease_expires_without_reassertion() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::Broadcast { uri: "ipp://printer.local:631/printers/hplj".to_string() };
    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    let id = result.entry_id.unwrap();

    let mut reconciler = Reconciler { catalogue: &mut catalogue, local_view: &mut local_view, client: &client, cfg: &cfg };
    reconciler.run_pass(1000).await;
    let lease_deadline = catalogue.get(id).unwrap().deadline.unwrap();

    // No re-assertion arrives; the next pass after the lease deadline retires
    // the local queue.
    reconciler.run_pass(lease_deadline).await;

    assert!(catalogue.get(id).is_none());
    assert_eq!(client.deleted(), vec!["hplj".to_string()]);
}

#[tokio::test]
async fn direct_printer_with_usable_pdl_is_accepted_even_when_queue_creation_is_disabled() {
    let client = FakePrintService::new();
    let mut cfg = AppConfig::default();
    cfg.create_ipp_printer_queues = false;
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::ServiceDiscovery {
        host: "printer.local".to_string(),
        port: 631,
        resource: "ipp/print".to_string(),
        secured: false,
        identity: ServiceIdentity {
            service_name: "HPLJ._ipp._tcp.local.".to_string(),
            service_type: "_ipp._tcp.local.".to_string(),
            service_domain: "local".to_string(),
        },
        txt: Some(TxtRecord { pdl: Some("application/pdf".to_string()), ..Default::default() }),
    };

    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    assert!(result.entry_id.is_some(), "a usable PDL must be accepted on its own, per the spec's OR semantics");
}

#[tokio::test]
async fn direct_printer_without_pdl_is_accepted_when_queue_creation_is_enabled() {
    let client = FakePrintService::new();
    let cfg = AppConfig::default();
    assert!(cfg.create_ipp_printer_queues);
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::ServiceDiscovery {
        host: "printer.local".to_string(),
        port: 631,
        resource: "ipp/print".to_string(),
        secured: false,
        identity: ServiceIdentity {
            service_name: "HPLJ._ipp._tcp.local.".to_string(),
            service_type: "_ipp._tcp.local.".to_string(),
            service_domain: "local".to_string(),
        },
        txt: Some(TxtRecord { pdl: Some("application/x-not-a-real-pdl".to_string()), ..Default::default() }),
    };

    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    assert!(result.entry_id.is_some(), "configuration alone must be enough when no usable PDL is advertised");
}

#[tokio::test]
async fn direct_printer_is_rejected_when_neither_configured_nor_usable_pdl() {
    let client = FakePrintService::new();
    let mut cfg = AppConfig::default();
    cfg.create_ipp_printer_queues = false;
    let mut catalogue = Catalogue::new();
    let mut local_view = LocalPrinterView::new();

    let event = IntakeEvent::ServiceDiscovery {
        host: "printer.local".to_string(),
        port: 631,
        resource: "ipp/print".to_string(),
        secured: false,
        identity: ServiceIdentity {
            service_name: "HPLJ._ipp._tcp.local.".to_string(),
            service_type: "_ipp._tcp.local.".to_string(),
            service_domain: "local".to_string(),
        },
        txt: Some(TxtRecord { pdl: Some("application/x-not-a-real-pdl".to_string()), ..Default::default() }),
    };

    let result = intake(event, &mut catalogue, &mut local_view, &client, &cfg, 1000).await.unwrap();
    assert!(result.entry_id.is_none());
    assert!(result.rejected_reason.is_some());
}
