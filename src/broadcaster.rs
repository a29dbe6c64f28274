//! Optional outgoing legacy-broadcast rebroadcast of locally shared queues.

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::discovery::broadcast::CUPS_PRINTER_REMOTE;
use crate::netif::NetifTracker;
use crate::print_service::PrintServiceClient;

/// Conservative UDP payload cap; oversize packets are dropped rather than
/// truncated.
const MAX_PACKET_BYTES: usize = 1400;

pub struct Broadcaster {
    socket: UdpSocket,
}

impl Broadcaster {
    pub async fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket })
    }

    /// One broadcast cycle: refresh interfaces, enumerate locally shared
    /// queues, and send a legacy browse packet per (queue, interface) pair.
    pub async fn run_cycle(&self, netif: &mut NetifTracker, client: &dyn PrintServiceClient, cfg: &AppConfig) {
        if let Err(e) = netif.refresh() {
            warn!(error = %e, "failed to refresh interfaces for broadcast cycle");
            return;
        }

        let printers = match client.get_printers().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to enumerate local printers for broadcast");
                return;
            }
        };

        for printer in printers.iter().filter(|p| p.is_shared) {
            let location = quote_field(printer.location.as_deref().unwrap_or(""));
            let info = quote_field(printer.info.as_deref().unwrap_or(""));
            let make_model = quote_field(printer.make_and_model.as_deref().unwrap_or(""));
            let extra_options = format_extra_options(&printer.options);

            for iface in netif.interfaces() {
                let uri = substitute_localhost(&printer.device_uri, &iface.address.to_string());
                // Wire format : type state uri "location" "info"
                // "make-model" lease-duration=N [<opt>=<val>...] — only the
                // three text fields after `uri` are quoted, `uri` itself is
                // not. `type` must never carry the delete bit, or every
                // receiving listener would silently discard this as a
                // removal.
                let packet = format!(
                    "{:x} {:x} {} \"{}\" \"{}\" \"{}\" lease-duration={}{}\n",
                    CUPS_PRINTER_REMOTE, 0x3, uri, location, info, make_model, cfg.browse_timeout_secs, extra_options
                );

                if packet.len() > MAX_PACKET_BYTES {
                    warn!(printer = %printer.name, size = packet.len(), "dropping oversize browse packet");
                    continue;
                }

                if let Err(e) = self.socket.send_to(packet.as_bytes(), iface.broadcast).await {
                    warn!(printer = %printer.name, interface = %iface.address, error = %e, "failed to send browse packet");
                } else {
                    debug!(printer = %printer.name, interface = %iface.address, "sent browse packet");
                }
            }
        }
    }
}

fn substitute_localhost(uri: &str, interface_addr: &str) -> String {
    uri.replace("localhost", interface_addr)
}

/// Escape embedded quotes/backslashes so a location or info string full of
/// user-entered text can never break the packet's quoted-field framing.
fn quote_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_extra_options(options: &[(String, String)]) -> String {
    options.iter().map(|(k, v)| format!(" {k}={v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_localhost_with_interface_address() {
        assert_eq!(
            substitute_localhost("ipp://localhost:631/printers/hplj", "192.168.1.5"),
            "ipp://192.168.1.5:631/printers/hplj"
        );
    }

    #[test]
    fn quote_field_escapes_embedded_quotes() {
        assert_eq!(quote_field("3rd Floor \"Annex\""), "3rd Floor \\\"Annex\\\"");
    }

    #[test]
    fn format_extra_options_prefixes_each_pair_with_a_space() {
        assert_eq!(
            format_extra_options(&[("cups-browsed-rs-default".to_string(), "true".to_string())]),
            " cups-browsed-rs-default=true"
        );
    }
}
