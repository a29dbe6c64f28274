//! Service-discovery browser built on `mdns-sd`: spawn a daemon, browse each
//! service type, and drain `ServiceEvent`s into normalised intake/removal
//! events.

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::catalogue::ServiceIdentity;
use crate::daemon::DaemonEvent;
use crate::discovery::{IPPS_SERVICE_TYPE, IPP_SERVICE_TYPE};
use crate::intake::{IntakeEvent, TxtRecord};

pub async fn run(tx: UnboundedSender<DaemonEvent>) {
    loop {
        match try_run(&tx).await {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, "mDNS browser disconnected; reconnecting in 5s");
                // Browser/client disconnect: tear the browsers down, surface
                // the loss so avahi-mode auto-shutdown can arm, and retry
                // the reconnect.
                let _ = tx.send(DaemonEvent::DiscoveryUnavailable);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn try_run(tx: &UnboundedSender<DaemonEvent>) -> Result<(), mdns_sd::Error> {
    let daemon = ServiceDaemon::new()?;
    let ipp_rx = daemon.browse(IPP_SERVICE_TYPE)?;
    let ipps_rx = daemon.browse(IPPS_SERVICE_TYPE)?;

    info!("service-discovery browser listening for {} and {}", IPP_SERVICE_TYPE, IPPS_SERVICE_TYPE);
    let _ = tx.send(DaemonEvent::DiscoveryAvailable);

    loop {
        tokio::select! {
            event = ipp_rx.recv_async() => handle_event(event, false, tx),
            event = ipps_rx.recv_async() => handle_event(event, true, tx),
        }
    }
}

fn handle_event(
    event: Result<ServiceEvent, mdns_sd::RecvError>,
    secured: bool,
    tx: &UnboundedSender<DaemonEvent>,
) {
    let event = match event {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "mDNS event channel error");
            return;
        }
    };

    match event {
        ServiceEvent::ServiceResolved(info) => {
            // `get_hostname()` returns the full resolved hostname with its
            // trailing dot (e.g. "printer.local."); keep it whole here so the
            // URI built in `intake()` carries the real host — sanitize_host()
            // is what strips the `.local[.]` suffix, not this layer.
            let hostname = info.get_hostname();
            if hostname.is_empty() {
                return;
            }
            let host = hostname.strip_suffix('.').unwrap_or(hostname).to_string();
            let port = info.get_port();
            let service_type = if secured { IPPS_SERVICE_TYPE } else { IPP_SERVICE_TYPE }.to_string();
            let identity = ServiceIdentity {
                service_name: info.get_fullname().to_string(),
                service_type: service_type.clone(),
                service_domain: "local".to_string(),
            };
            let props = info.get_properties();
            let get = |k: &str| props.get_property_val_str(k).map(str::to_string);
            let Some(resource) = get("rp") else {
                debug!(service = %identity.service_name, "ignoring resolved service with no rp txt record");
                return;
            };
            let txt = TxtRecord {
                rp: Some(resource.clone()),
                product: get("product"),
                ty: get("ty"),
                usb_mdl: get("usb_MDL"),
                pdl: get("pdl"),
            };
            let event = IntakeEvent::ServiceDiscovery { host, port, resource, secured, identity, txt: Some(txt) };
            let _ = tx.send(DaemonEvent::Intake(event));
        }
        ServiceEvent::ServiceRemoved(service_type, fullname) => {
            let identity = ServiceIdentity { service_name: fullname, service_type, service_domain: "local".to_string() };
            let _ = tx.send(DaemonEvent::ServiceRemoved(identity));
        }
        ServiceEvent::SearchStopped(_) | ServiceEvent::ServiceFound(_, _) => {}
    }
}
