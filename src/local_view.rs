use std::collections::HashMap;

use crate::errors::Result;
use crate::print_service::PrintServiceClient;

/// One queue as the local print service currently reports it.
#[derive(Debug, Clone)]
pub struct LocalPrinterEntry {
    pub device_uri: String,
    pub daemon_controlled: bool,
}

/// Option name stamped on every queue the daemon creates; queues without it
/// are externally owned and never touched.
pub const OWNER_SENTINEL: &str = "cups-browsed-rs-default";

/// A snapshot of the queues defined in the local print service, keyed by
/// name. Rebuilt wholesale via `refresh()`, or incrementally via the
/// subscription fast path when the print service supports one.
pub struct LocalPrinterView {
    queues: HashMap<String, LocalPrinterEntry>,
    subscription_id: i32,
    last_sequence: i32,
    inhibited: bool,
}

impl LocalPrinterView {
    pub fn new() -> Self {
        Self { queues: HashMap::new(), subscription_id: -1, last_sequence: 0, inhibited: false }
    }

    pub fn get(&self, name: &str) -> Option<&LocalPrinterEntry> {
        self.queues.get(name)
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        self.queues.values().any(|e| e.device_uri == uri)
    }

    /// Suppress refreshes while the reconciler is actively mutating queues, so
    /// the daemon never mistakes its own writes for external changes.
    pub fn inhibit(&mut self) {
        self.inhibited = true;
    }

    pub fn uninhibit(&mut self) {
        self.inhibited = false;
    }

    pub async fn refresh(&mut self, client: &dyn PrintServiceClient) -> Result<()> {
        if self.inhibited {
            return Ok(());
        }
        if self.subscription_id >= 0 {
            match client.get_notifications(self.subscription_id, self.last_sequence + 1).await {
                Ok(notif) => {
                    if notif.events.is_empty() {
                        return Ok(());
                    }
                    self.last_sequence = notif.last_sequence_number;
                }
                Err(_) => {
                    self.subscription_id = -1;
                }
            }
        }
        self.full_enumerate(client).await
    }

    async fn full_enumerate(&mut self, client: &dyn PrintServiceClient) -> Result<()> {
        let printers = client.get_printers().await?;
        self.queues = printers
            .into_iter()
            .map(|p| {
                let owned = p.options.iter().any(|(k, v)| k == OWNER_SENTINEL && v == "true");
                (p.name, LocalPrinterEntry { device_uri: p.device_uri, daemon_controlled: owned })
            })
            .collect();

        if self.subscription_id < 0 {
            if let Ok(id) = client.create_subscription().await {
                self.subscription_id = id;
                self.last_sequence = 0;
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalPrinterEntry)> {
        self.queues.iter()
    }
}

impl Default for LocalPrinterView {
    fn default() -> Self {
        Self::new()
    }
}
