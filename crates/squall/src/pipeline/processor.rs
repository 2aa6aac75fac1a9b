//! The Processor: pulls bundles of notifications and handles them.
//!
//! Implements the PollingProcessor trait. Each pulled batch is one bundle:
//! it gets its own storage client scope, its records are handled one after
//! another, and every message is acked or released as soon as its outcome is
//! known. Dead-lettered messages are the exception: they are acked at the end
//! of the bundle, once their DLQ records have been written.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use squall_core::emit;
use squall_core::metrics::events::{BundleProcessed, NotificationsReceived};
use squall_core::polling::{IterationResult, PollingProcessor};

use super::record::{RecordHandler, RecordOutcome};
use crate::dlq::{Failure, FailureAction, FailureTracker};
use crate::error::{PipelineError, RecordError};
use crate::locator::{FetcherFactory, Locator, ObjectFetcher};
use crate::source::{NotificationSource, ReceivedMessage};

/// Long-lived job state shared across bundles.
pub struct Processor {
    /// Identifier used in logs and metric labels.
    target: String,
    source: Arc<dyn NotificationSource>,
    fetchers: Arc<dyn FetcherFactory>,
    handler: RecordHandler,
    failure_tracker: FailureTracker,
    max_messages: usize,
}

impl Processor {
    pub fn new(
        target: impl Into<String>,
        source: Arc<dyn NotificationSource>,
        fetchers: Arc<dyn FetcherFactory>,
        handler: RecordHandler,
        failure_tracker: FailureTracker,
        max_messages: usize,
    ) -> Self {
        Self {
            target: target.into(),
            source,
            fetchers,
            handler,
            failure_tracker,
            max_messages,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failure_tracker.count()
    }

    /// Flush the DLQ on the way out.
    pub async fn finalize(&self) {
        self.failure_tracker.finalize_dlq().await;
    }

    async fn handle_message(
        &self,
        message: &ReceivedMessage,
        storage: &dyn ObjectFetcher,
    ) -> Result<RecordOutcome, (Option<Locator>, RecordError)> {
        if let Some(e) = &message.decode_error {
            return Err((None, RecordError::BodyEncoding { source: e.clone() }));
        }
        let locator = RecordHandler::locate(&message.data).map_err(|e| (None, e))?;
        self.handler
            .handle(&locator, storage)
            .await
            .map_err(|e| (Some(locator), e))
    }

    /// Write the bundle's dead-lettered records, then acknowledge their
    /// messages. If the write fails the messages are released instead.
    async fn settle_dead_letters(&self, ack_ids: &[String]) -> Result<(), PipelineError> {
        if ack_ids.is_empty() {
            return Ok(());
        }

        match self.failure_tracker.flush_dlq().await {
            Ok(()) => self.source.ack(ack_ids).await?,
            Err(e) => {
                warn!(
                    target = %self.target,
                    count = ack_ids.len(),
                    error = %e,
                    "Failed to write DLQ, releasing dead-lettered messages"
                );
                self.source.nack(ack_ids).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PollingProcessor for Processor {
    type State = Vec<ReceivedMessage>;
    type Error = PipelineError;

    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error> {
        if cold_start {
            info!(target = %self.target, "Waiting for notifications");
        }

        let messages = self.source.pull(self.max_messages).await?;
        if messages.is_empty() {
            return Ok(None);
        }

        emit!(NotificationsReceived {
            count: messages.len() as u64,
        });
        debug!(target = %self.target, count = messages.len(), "Pulled bundle");
        Ok(Some(messages))
    }

    async fn process(&mut self, bundle: Self::State) -> Result<IterationResult, Self::Error> {
        let start = Instant::now();
        let size = bundle.len();
        // Clients opened here serve this bundle only
        let storage = self.fetchers.open_bundle();
        // Acknowledged only after their DLQ records are written
        let mut dead_lettered = Vec::new();

        for (index, message) in bundle.iter().enumerate() {
            let (locator, error) = match self.handle_message(message, storage.as_ref()).await {
                Ok(outcome) => {
                    if let RecordOutcome::Loaded { table } = &outcome {
                        debug!(
                            target = %self.target,
                            message_id = %message.message_id,
                            table = %table,
                            "Record loaded"
                        );
                    }
                    self.source.ack(std::slice::from_ref(&message.ack_id)).await?;
                    continue;
                }
                Err(failed) => failed,
            };

            let locator = locator.map(|l| l.to_string());
            let kind = error.kind();
            warn!(
                target = %self.target,
                message_id = %message.message_id,
                locator = locator.as_deref().unwrap_or("-"),
                kind = kind.as_str(),
                error = %error,
                "Failed to process notification"
            );

            let error_text = error.to_string();
            let failure = Failure {
                message_id: &message.message_id,
                locator: locator.as_deref(),
                data: &message.data,
                error: &error_text,
                kind,
            };

            match self.failure_tracker.record_failure(failure).await {
                FailureAction::DeadLettered => dead_lettered.push(message.ack_id.clone()),
                FailureAction::Redeliver => {
                    self.source.nack(std::slice::from_ref(&message.ack_id)).await?;
                }
            }

            if let Err(stop) = self.failure_tracker.check_budget() {
                // Release everything not yet handled
                let remaining: Vec<String> =
                    bundle[index + 1..].iter().map(|m| m.ack_id.clone()).collect();
                if let Err(e) = self.source.nack(&remaining).await {
                    warn!(
                        target = %self.target,
                        error = %e,
                        "Failed to release unprocessed messages"
                    );
                }
                if let Err(e) = self.settle_dead_letters(&dead_lettered).await {
                    warn!(
                        target = %self.target,
                        error = %e,
                        "Failed to settle dead-lettered messages"
                    );
                }
                return Err(stop);
            }
        }

        self.settle_dead_letters(&dead_lettered).await?;

        emit!(BundleProcessed {
            size: size as u64,
            duration: start.elapsed(),
        });
        Ok(IterationResult::ProcessedItems)
    }
}
