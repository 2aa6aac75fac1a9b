//! Dead letter queue writer.
//!
//! Failed notifications are buffered and written as NDJSON. Every flush
//! writes a new object so earlier flushes are never overwritten. Records are
//! only durable once `flush` returns; callers must not acknowledge the
//! source messages before that.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use object_store::path::Path;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, info};

use squall_core::{FailureKind, StorageProvider};

use super::types::{FailedRecord, FailureStats};
use super::{DlqError, SerializeSnafu, StorageSnafu, WriteSnafu};

/// Buffered NDJSON writer for failed notifications.
pub struct DeadLetterQueue {
    storage: StorageProvider,
    run_id: String,
    sequence: AtomicUsize,
    buffer: Mutex<Vec<FailedRecord>>,
    stats: Mutex<FailureStats>,
}

impl DeadLetterQueue {
    /// Open a DLQ at `path`. Returns `None` when no path is configured.
    pub async fn from_path(path: Option<&str>) -> Result<Option<Self>, DlqError> {
        let Some(path) = path else {
            return Ok(None);
        };

        let storage = StorageProvider::for_url(path).await.context(StorageSnafu)?;
        info!(path, "DLQ enabled");
        Ok(Some(Self::new(storage)))
    }

    pub fn new(storage: StorageProvider) -> Self {
        Self {
            storage,
            run_id: Utc::now().format("%Y%m%d-%H%M%S").to_string(),
            sequence: AtomicUsize::new(0),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(FailureStats::default()),
        }
    }

    /// Buffer a failed notification until the next flush.
    pub async fn record(
        &self,
        message_id: &str,
        locator: Option<&str>,
        data: &[u8],
        error: &str,
        kind: FailureKind,
    ) {
        let failed = FailedRecord {
            message_id: message_id.to_string(),
            locator: locator.map(str::to_string),
            data: String::from_utf8_lossy(data).into_owned(),
            error: error.to_string(),
            kind,
            timestamp: Utc::now(),
        };
        debug!(message_id, kind = kind.as_str(), "Recording DLQ failure");

        self.stats.lock().await.increment(kind);
        self.buffer.lock().await.push(failed);
    }

    /// Number of records waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Write buffered records to a new NDJSON object.
    ///
    /// On error the buffered records are discarded: their messages are
    /// released for redelivery and will be recorded again.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let mut ndjson = String::new();
        for record in &records {
            ndjson.push_str(&serde_json::to_string(record).context(SerializeSnafu)?);
            ndjson.push('\n');
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let path = Path::from(format!("failures-{}-{sequence:05}.ndjson", self.run_id));
        self.storage.put(&path, ndjson).await.context(WriteSnafu)?;

        info!(count = records.len(), file = %path, "Flushed DLQ records");
        Ok(())
    }

    /// Flush what is left and log a summary.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = self.stats.lock().await;
        info!(
            total = stats.total(),
            malformed_input = stats.malformed_input,
            not_found = stats.not_found,
            downstream = stats.downstream,
            "DLQ finalized"
        );
        Ok(())
    }

    pub async fn stats(&self) -> FailureStats {
        self.stats.lock().await.clone()
    }
}
