// Shared fixtures for the daemon's integration tests: a fake local/remote
// print service backing `PrintServiceClient`, so intake and the reconciler
// can be driven end-to-end without a real CUPS instance.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use cups_browsed_rs::errors::{DaemonError, Result};
use cups_browsed_rs::local_view::OWNER_SENTINEL;
use cups_browsed_rs::print_service::{
    AddModifyRequest, NotificationResult, PrintServiceClient, PrinterAttributes, PrinterRecord,
};

#[derive(Debug, Clone)]
pub struct FakeQueue {
    pub device_uri: String,
    pub daemon_owned: bool,
    pub shared: bool,
    pub has_active_jobs: bool,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, FakeQueue>,
    default_printer: Option<String>,
    unreachable: bool,
    deleted: Vec<String>,
    add_modify_calls: Vec<AddModifyRequest>,
    next_subscription_id: i32,
}

/// A fake local (or remote) print service. Every daemon component talks to
/// the real thing only through `PrintServiceClient`, so this is the one
/// fixture every integration test needs.
#[allow(dead_code)]
pub struct FakePrintService {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl FakePrintService {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Seed a queue as if it already existed before the daemon ran, e.g. a
    /// user's pre-existing external queue or a prior-session daemon-owned
    /// one recovered at startup.
    pub fn with_existing_queue(self, name: &str, device_uri: &str, daemon_owned: bool) -> Self {
        self.state.lock().unwrap().queues.insert(
            name.to_string(),
            FakeQueue { device_uri: device_uri.to_string(), daemon_owned, shared: false, has_active_jobs: false },
        );
        self
    }

    pub fn set_default(&self, name: &str) {
        self.state.lock().unwrap().default_printer = Some(name.to_string());
    }

    pub fn clear_default(&self) {
        self.state.lock().unwrap().default_printer = None;
    }

    pub fn set_active_jobs(&self, name: &str, active: bool) {
        if let Some(q) = self.state.lock().unwrap().queues.get_mut(name) {
            q.has_active_jobs = active;
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().unwrap().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_queue(&self, name: &str) -> Option<FakeQueue> {
        self.state.lock().unwrap().queues.get(name).cloned()
    }

    pub fn add_modify_calls(&self) -> Vec<AddModifyRequest> {
        self.state.lock().unwrap().add_modify_calls.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl Default for FakePrintService {
    fn default() -> Self {
        Self::new()
    }
}

fn unreachable_err() -> DaemonError {
    DaemonError::PrintService("fake print service marked unreachable".to_string())
}

#[async_trait]
impl PrintServiceClient for FakePrintService {
    async fn get_printers(&self) -> Result<Vec<PrinterRecord>> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unreachable_err());
        }
        Ok(state
            .queues
            .iter()
            .map(|(name, q)| PrinterRecord {
                name: name.clone(),
                device_uri: q.device_uri.clone(),
                is_shared: q.shared,
                location: None,
                info: None,
                make_and_model: None,
                options: if q.daemon_owned { vec![(OWNER_SENTINEL.to_string(), "true".to_string())] } else { vec![] },
            })
            .collect())
    }

    async fn get_printer_attributes(&self, _uri: &str) -> Result<PrinterAttributes> {
        Ok(PrinterAttributes {
            make_and_model: Some("Fake Printer 1000".to_string()),
            document_formats: vec!["application/pdf".to_string()],
        })
    }

    async fn add_modify_printer(&self, req: AddModifyRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unreachable_err());
        }
        state.queues.insert(
            req.name.clone(),
            FakeQueue { device_uri: req.device_uri.clone(), daemon_owned: true, shared: req.shared, has_active_jobs: false },
        );
        state.add_modify_calls.push(req);
        Ok(())
    }

    async fn delete_printer(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unreachable_err());
        }
        state.queues.remove(name);
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn get_default(&self) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unreachable_err());
        }
        Ok(state.default_printer.clone())
    }

    async fn has_active_jobs(&self, name: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unreachable_err());
        }
        Ok(state.queues.get(name).map(|q| q.has_active_jobs).unwrap_or(false))
    }

    async fn create_subscription(&self) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.next_subscription_id += 1;
        Ok(state.next_subscription_id)
    }

    async fn get_notifications(&self, _subscription_id: i32, since_sequence: i32) -> Result<NotificationResult> {
        Ok(NotificationResult { events: Vec::new(), last_sequence_number: since_sequence - 1 })
    }

    async fn cancel_subscription(&self, _subscription_id: i32) -> Result<()> {
        Ok(())
    }
}
