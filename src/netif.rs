use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::errors::Result;

/// A broadcast-capable network interface, resolved down to the address we'll
/// bind from and the broadcast socket address we'll send to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub address: IpAddr,
    pub broadcast: SocketAddr,
}

/// Debounce window for coalescing bursts of network-change notifications into
/// a single `refresh()`.
const DEBOUNCE: Duration = Duration::from_secs(10);

pub struct NetifTracker {
    port: u16,
    interfaces: Vec<NetInterface>,
    last_change_seen: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl NetifTracker {
    pub fn new(port: u16) -> Self {
        Self { port, interfaces: Vec::new(), last_change_seen: None, last_refresh: None }
    }

    pub fn interfaces(&self) -> &[NetInterface] {
        &self.interfaces
    }

    /// Re-enumerate OS interfaces, keeping only those that are broadcast-capable,
    /// non-loopback, and IPv4-or-routable-IPv6 (IPv6 link-local is
    /// skipped, since cups-browsed-style legacy broadcast has no IPv6 story).
    pub fn refresh(&mut self) -> Result<()> {
        let raw = if_addrs::get_if_addrs()
            .map_err(|e| crate::errors::DaemonError::Network(format!("enumerating interfaces: {e}")))?;

        let mut found = Vec::new();
        for iface in raw {
            if iface.is_loopback() {
                continue;
            }
            match iface.addr {
                if_addrs::IfAddr::V4(v4) => {
                    if let Some(bcast) = v4.broadcast {
                        found.push(NetInterface {
                            address: IpAddr::V4(v4.ip),
                            broadcast: SocketAddr::new(IpAddr::V4(bcast), self.port),
                        });
                    }
                }
                if_addrs::IfAddr::V6(v6) => {
                    if is_link_local(&v6.ip) {
                        continue;
                    }
                    if let Some(bcast) = v6.broadcast {
                        found.push(NetInterface {
                            address: IpAddr::V6(v6.ip),
                            broadcast: SocketAddr::new(IpAddr::V6(bcast), self.port),
                        });
                    }
                }
            }
        }
        found.dedup();
        self.interfaces = found;
        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Record that the host reported a network-change event; returns true if a
    /// refresh should run now (i.e. we're past the debounce window since the
    /// last one we acted on).
    pub fn notify_change(&mut self) -> bool {
        let now = Instant::now();
        let should_refresh = match self.last_change_seen {
            Some(prev) if now.duration_since(prev) < DEBOUNCE => false,
            _ => true,
        };
        self.last_change_seen = Some(now);
        should_refresh
    }
}

fn is_link_local(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounces_rapid_change_notifications() {
        let mut tracker = NetifTracker::new(631);
        assert!(tracker.notify_change());
        assert!(!tracker.notify_change());
    }
}
