//! Generic polling loop trait and runner.
//!
//! The job's pull loop: prepare a unit of work, process it, wait, repeat
//! until shutdown.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationDuration, IterationResultType};

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Items were processed successfully.
    ProcessedItems,
    /// No items were available to process.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// Trait for implementing a polling-based processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there's no work to do.
    ///
    /// # Arguments
    /// * `cold_start` - True on the first iteration
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Run a polling loop with the given processor.
///
/// 1. Call `prepare()` (with cold_start=true on first iteration)
/// 2. Call `process()` if there's work to do
/// 3. If nothing was found, wait for poll_interval (plus jitter) or shutdown
/// 4. Repeat until shutdown
///
/// A streaming subscription usually has more messages waiting right after a
/// busy iteration, so the wait is only applied when an iteration was idle.
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    poll_interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
) -> Result<(), P::Error> {
    let mut first_iteration = true;

    loop {
        let iteration_start = Instant::now();
        let shutdown_clone = shutdown.clone();
        let state = tokio::select! {
            biased;

            _ = shutdown_clone.cancelled() => {
                info!(target = name, "Shutdown requested while waiting for work");
                return Ok(());
            }

            result = async {
                let cold_start = first_iteration;
                first_iteration = false;
                processor.prepare(cold_start).await
            } => result?,
        };

        let result = match state {
            Some(s) => {
                // Processing is not raced against shutdown: a bundle that has
                // started is finished so its messages are acked or nacked.
                processor.process(s).await?
            }
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => break,
            IterationResult::NoItems => IterationResultType::NoItems,
            IterationResult::ProcessedItems => IterationResultType::Processed,
        };
        emit!(IterationCompleted {
            result: result_type,
            target: name.to_string(),
        });
        emit!(IterationDuration {
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });

        if shutdown.is_cancelled() {
            info!(target = name, "Shutdown requested after iteration");
            break;
        }

        if result == IterationResult::ProcessedItems {
            continue;
        }

        let sleep_duration = poll_interval + random_jitter(poll_jitter_secs);
        debug!(
            target = name,
            "No new items, waiting {}ms before next poll",
            sleep_duration.as_millis()
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(sleep_duration))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    Ok(())
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
