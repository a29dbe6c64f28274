//! The local/remote print service is an external collaborator : an
//! IPP endpoint reachable over HTTP(S). This module defines the RPC surface
//! the rest of the daemon needs against it, plus a real IPP-backed
//! implementation. Tests substitute `tests::common::FakePrintService`.

mod ipp_backend;

pub use ipp_backend::IppPrintService;

use async_trait::async_trait;

use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct PrinterRecord {
    pub name: String,
    pub device_uri: String,
    pub is_shared: bool,
    /// `printer-location`, for the `BrowseData.location` field of an outgoing
    /// browse packet.
    pub location: Option<String>,
    /// `printer-info`, for the `BrowseData.info` field of an outgoing browse
    /// packet.
    pub info: Option<String>,
    /// `printer-make-and-model`, for the `BrowseData.make_model` field of an
    /// outgoing browse packet.
    pub make_and_model: Option<String>,
    pub options: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct PrinterAttributes {
    pub make_and_model: Option<String>,
    pub document_formats: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub subscribed_event: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationResult {
    pub events: Vec<NotificationEvent>,
    pub last_sequence_number: i32,
}

/// A queue creation/modification request: create-or-modify (ADD_MODIFY)
/// the local queue.
#[derive(Debug, Clone)]
pub struct AddModifyRequest {
    pub name: String,
    pub device_uri: String,
    pub make_and_model: Option<String>,
    pub ppd_path: Option<std::path::PathBuf>,
    pub interface_script_path: Option<std::path::PathBuf>,
    pub shared: bool,
}

/// The events a subscription asks for.
pub const SUBSCRIBED_EVENTS: &[&str] =
    &["printer-added", "printer-changed", "printer-config-changed", "printer-modified", "printer-deleted", "printer-state-changed"];

#[async_trait]
pub trait PrintServiceClient: Send + Sync {
    async fn get_printers(&self) -> Result<Vec<PrinterRecord>>;
    async fn get_printer_attributes(&self, uri: &str) -> Result<PrinterAttributes>;
    async fn add_modify_printer(&self, req: AddModifyRequest) -> Result<()>;
    async fn delete_printer(&self, name: &str) -> Result<()>;
    async fn get_default(&self) -> Result<Option<String>>;
    async fn has_active_jobs(&self, name: &str) -> Result<bool>;
    async fn create_subscription(&self) -> Result<i32>;
    async fn get_notifications(&self, subscription_id: i32, since_sequence: i32) -> Result<NotificationResult>;
    async fn cancel_subscription(&self, subscription_id: i32) -> Result<()>;
}
