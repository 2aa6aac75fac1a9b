//! Internal events for squall metrics emission.
//!
//! Each event struct represents a measurable occurrence in the job. Events
//! implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when notifications are pulled from the subscription.
pub struct NotificationsReceived {
    pub count: u64,
}

impl InternalEvent for NotificationsReceived {
    fn emit(self) {
        trace!(count = self.count, "Notifications received");
        counter!("squall_notifications_received_total").increment(self.count);
    }
}

/// Event emitted when a row is appended to a warehouse table.
pub struct RecordsLoaded {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RecordsLoaded {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Records loaded");
        counter!("squall_records_loaded_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when a record is dropped because its object has no mapping.
pub struct RecordSkipped {
    pub object: String,
}

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!(object = %self.object, "Record skipped");
        counter!("squall_records_skipped_total", "object" => self.object).increment(1);
    }
}

/// Classification of a failed record, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The notification or object content could not be interpreted.
    MalformedInput,
    /// The referenced object (or the mapping document) does not exist.
    NotFound,
    /// A downstream service (storage, warehouse) failed.
    Downstream,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MalformedInput => "malformed_input",
            FailureKind::NotFound => "not_found",
            FailureKind::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted when a record fails processing.
pub struct RecordFailed {
    pub kind: FailureKind,
}

impl InternalEvent for RecordFailed {
    fn emit(self) {
        trace!(kind = self.kind.as_str(), "Record failed");
        counter!("squall_records_failed_total", "kind" => self.kind.as_str()).increment(1);
    }
}

/// Event emitted when a pulled bundle has been fully processed.
pub struct BundleProcessed {
    pub size: u64,
    pub duration: Duration,
}

impl InternalEvent for BundleProcessed {
    fn emit(self) {
        trace!(
            size = self.size,
            duration_ms = self.duration.as_millis(),
            "Bundle processed"
        );
        counter!("squall_bundles_processed_total").increment(1);
        histogram!("squall_bundle_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a warehouse load job finishes.
pub struct LoadJobCompleted {
    pub table: String,
    pub duration: Duration,
    pub success: bool,
}

impl InternalEvent for LoadJobCompleted {
    fn emit(self) {
        let status = if self.success { "success" } else { "error" };
        trace!(
            table = %self.table,
            status,
            duration_ms = self.duration.as_millis(),
            "Load job completed"
        );
        counter!("squall_load_jobs_total", "status" => status).increment(1);
        histogram!("squall_load_job_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the schema mapping document is read from storage.
pub struct MappingDocumentFetched {
    pub cached: bool,
}

impl InternalEvent for MappingDocumentFetched {
    fn emit(self) {
        let source = if self.cached { "cache" } else { "storage" };
        trace!(source, "Mapping document fetched");
        counter!("squall_mapping_fetches_total", "source" => source).increment(1);
    }
}

// ============================================================================
// Storage and iteration events
// ============================================================================

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Request status.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for each storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "squall_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the duration of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "squall_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Outcome of a polling iteration.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// Event emitted when a polling iteration completes.
pub struct IterationCompleted {
    pub result: IterationResultType,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        counter!(
            "squall_iterations_total",
            "result" => self.result.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Event emitted with the duration of a polling iteration.
pub struct IterationDuration {
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        histogram!("squall_iteration_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}
