//! Failure tracking with DLQ integration and a failure budget.

use std::sync::Arc;

use tracing::error;

use squall_core::FailureKind;
use squall_core::emit;
use squall_core::metrics::events::RecordFailed;

use crate::error::{MaxFailuresSnafu, PipelineError};

use super::{DeadLetterQueue, DlqError};

/// What to do with the message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// The failure is buffered in the DLQ. Acknowledge the message once
    /// [`FailureTracker::flush_dlq`] succeeds, release it otherwise.
    DeadLettered,
    /// Leave the message to be redelivered.
    Redeliver,
}

/// Details of one failed notification.
#[derive(Debug, Clone, Copy)]
pub struct Failure<'a> {
    pub message_id: &'a str,
    pub locator: Option<&'a str>,
    pub data: &'a [u8],
    pub error: &'a str,
    pub kind: FailureKind,
}

/// Counts failures, dead-letters malformed input and enforces
/// `max_failures`.
pub struct FailureTracker {
    count: usize,
    max_failures: usize,
    dlq: Option<Arc<DeadLetterQueue>>,
}

impl FailureTracker {
    /// `max_failures` of 0 means unlimited.
    pub fn new(max_failures: usize, dlq: Option<Arc<DeadLetterQueue>>) -> Self {
        Self {
            count: 0,
            max_failures,
            dlq,
        }
    }

    /// Record a failure and decide what happens to its message.
    ///
    /// Malformed input cannot succeed on redelivery, so with a DLQ it is
    /// dead-lettered. Everything else is redelivered.
    pub async fn record_failure(&mut self, failure: Failure<'_>) -> FailureAction {
        self.count += 1;
        emit!(RecordFailed { kind: failure.kind });

        match (&self.dlq, failure.kind) {
            (Some(dlq), FailureKind::MalformedInput) => {
                dlq.record(
                    failure.message_id,
                    failure.locator,
                    failure.data,
                    failure.error,
                    failure.kind,
                )
                .await;
                FailureAction::DeadLettered
            }
            _ => FailureAction::Redeliver,
        }
    }

    /// Fails once the failure budget is spent.
    pub fn check_budget(&self) -> Result<(), PipelineError> {
        if self.max_failures > 0 && self.count >= self.max_failures {
            error!(count = self.count, "Max failures reached, stopping job");
            return MaxFailuresSnafu { count: self.count }.fail();
        }
        Ok(())
    }

    /// Write buffered DLQ records.
    pub async fn flush_dlq(&self) -> Result<(), DlqError> {
        match &self.dlq {
            Some(dlq) => dlq.flush().await,
            None => Ok(()),
        }
    }

    /// Finalize the DLQ, logging any errors.
    pub async fn finalize_dlq(&self) {
        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!(error = %e, "Failed to finalize DLQ");
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn failure(kind: FailureKind) -> Failure<'static> {
        Failure {
            message_id: "m1",
            locator: None,
            data: b"{}",
            error: "boom",
            kind,
        }
    }

    #[tokio::test]
    async fn test_flush_without_dlq_is_noop() {
        let tracker = FailureTracker::new(0, None);
        tracker.flush_dlq().await.unwrap();
        assert!(tracker.check_budget().is_ok());
    }

    #[tokio::test]
    async fn test_without_dlq_everything_is_redelivered() {
        let mut tracker = FailureTracker::new(0, None);

        for kind in [
            FailureKind::MalformedInput,
            FailureKind::NotFound,
            FailureKind::Downstream,
        ] {
            let action = tracker.record_failure(failure(kind)).await;
            assert_eq!(action, FailureAction::Redeliver);
        }
        assert_eq!(tracker.count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_input_is_dead_lettered() {
        let temp_dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::from_path(temp_dir.path().to_str())
            .await
            .unwrap()
            .map(Arc::new);
        let mut tracker = FailureTracker::new(0, dlq.clone());

        let action = tracker
            .record_failure(failure(FailureKind::MalformedInput))
            .await;
        assert_eq!(action, FailureAction::DeadLettered);

        let action = tracker.record_failure(failure(FailureKind::Downstream)).await;
        assert_eq!(action, FailureAction::Redeliver);

        let dlq = dlq.unwrap();
        assert_eq!(dlq.stats().await.total(), 1);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);

        tracker.flush_dlq().await.unwrap();
        assert_eq!(dlq.pending().await, 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_max_failures_stops() {
        let mut tracker = FailureTracker::new(2, None);

        tracker.record_failure(failure(FailureKind::NotFound)).await;
        assert!(tracker.check_budget().is_ok());

        tracker.record_failure(failure(FailureKind::NotFound)).await;
        let err = tracker.check_budget().unwrap_err();
        assert!(matches!(err, PipelineError::MaxFailures { count: 2 }));
    }
}
