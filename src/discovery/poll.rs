//! Poll workers: one per configured upstream server, pulling its
//! shared-printer list via IPP subscription/poll with a periodic
//! full-enumeration fallback.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::catalogue::ServiceIdentity;
use crate::config::PollServerConfig;
use crate::daemon::DaemonEvent;
use crate::intake::IntakeEvent;
use crate::print_service::{IppPrintService, PrintServiceClient};

struct PollContext {
    known_printers: Vec<(String, String)>,
    can_subscribe: bool,
    subscription_id: i32,
    sequence_number: i32,
}

impl PollContext {
    fn new() -> Self {
        Self { known_printers: Vec::new(), can_subscribe: true, subscription_id: -1, sequence_number: 0 }
    }
}

/// Connect-with-retry timeout, so a single unreachable poll server never
/// blocks the worker task indefinitely.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(server: PollServerConfig, poll_interval: Duration, tx: UnboundedSender<DaemonEvent>) {
    let base = format!("http://{}:{}", server.host, server.port);
    let mut ctx = PollContext::new();

    loop {
        let client = match (|| async { IppPrintService::new(&base) })
            .retry(ExponentialBuilder::default().with_max_times(3))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(server = %server.host, error = %e, "poll worker could not construct client; retrying later");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        run_one_cycle(&server, &client, &mut ctx, &tx).await;
        tokio::time::sleep(poll_interval).await;
    }
}

async fn run_one_cycle(
    server: &PollServerConfig,
    client: &IppPrintService,
    ctx: &mut PollContext,
    tx: &UnboundedSender<DaemonEvent>,
) {
    let mut force_full_list = false;

    if ctx.can_subscribe && ctx.subscription_id < 0 {
        match tokio::time::timeout(CONNECT_TIMEOUT, client.create_subscription()).await {
            Ok(Ok(id)) => ctx.subscription_id = id,
            _ => {
                ctx.can_subscribe = false;
                force_full_list = true;
            }
        }
    } else if ctx.subscription_id >= 0 {
        match tokio::time::timeout(CONNECT_TIMEOUT, client.get_notifications(ctx.subscription_id, ctx.sequence_number + 1))
            .await
        {
            Ok(Ok(notif)) => {
                if !notif.events.is_empty() {
                    ctx.sequence_number = notif.last_sequence_number;
                    force_full_list = true;
                }
            }
            _ => {
                let _ = client.cancel_subscription(ctx.subscription_id).await;
                ctx.subscription_id = -1;
                force_full_list = true;
            }
        }
    } else {
        force_full_list = true;
    }

    if force_full_list || ctx.subscription_id < 0 {
        match tokio::time::timeout(CONNECT_TIMEOUT, client.get_printers()).await {
            Ok(Ok(printers)) => {
                // `get_printers()` already drops remote/implicit entries;
                // shared-ness is the one filter left to apply here, since
                // the local-view caller of the same RPC wants every local
                // queue, shared or not.
                ctx.known_printers = printers
                    .into_iter()
                    .filter(|p| p.is_shared)
                    .map(|p| (p.name, p.device_uri))
                    .collect();
                for (name, uri) in &ctx.known_printers {
                    send_keepalive(server, name, uri, tx);
                }
            }
            _ => {
                warn!(server = %server.host, "Get-Printers failed; will retry next interval");
            }
        }
    } else {
        debug!(server = %server.host, count = ctx.known_printers.len(), "re-asserting known printers");
        let printers = ctx.known_printers.clone();
        for (name, uri) in &printers {
            send_keepalive(server, name, uri, tx);
        }
    }
}

fn send_keepalive(_server: &PollServerConfig, _name: &str, device_uri: &str, tx: &UnboundedSender<DaemonEvent>) {
    let event = IntakeEvent::Broadcast { uri: device_uri.to_string() };
    let _ = tx.send(DaemonEvent::Intake(event));
}
