//! Dead letter queue for notifications that cannot be processed.
//!
//! Failed notifications are written as NDJSON to a configurable storage
//! location for later inspection and replay.

mod queue;
mod tracker;
mod types;

pub use queue::DeadLetterQueue;
pub use tracker::{Failure, FailureAction, FailureTracker};
pub use types::{FailedRecord, FailureStats};

use snafu::prelude::*;

use squall_core::StorageError;

/// DLQ errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DlqError {
    /// Failed to write to the DLQ.
    #[snafu(display("Failed to write to DLQ: {source}"))]
    Write { source: StorageError },

    /// Failed to serialize a failed record.
    #[snafu(display("Failed to serialize DLQ record: {source}"))]
    Serialize { source: serde_json::Error },

    /// Failed to open DLQ storage.
    #[snafu(display("Failed to create DLQ storage: {source}"))]
    Storage { source: StorageError },
}
