//! The streaming job: wiring of source, stages and sink around the polling
//! loop.

mod processor;
mod record;

pub use processor::Processor;
pub use record::{RecordHandler, RecordOutcome};

use std::net::SocketAddr;
use std::sync::Arc;

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use squall_core::error::{AddressParseSnafu, MetricsSnafu};
use squall_core::{StorageProvider, init_metrics, run_polling_loop, spawn_shutdown_handler};

use crate::auth::{self, NoAuth, TokenProviderRef};
use crate::config::JobConfig;
use crate::dlq::{DeadLetterQueue, FailureTracker};
use crate::error::{ConfigSnafu, PipelineError, SetupSnafu, SinkSnafu};
use crate::locator::CloudStorageFetchers;
use crate::mapping::MappingRegistry;
use crate::source::{NotificationSource, PubSubSettings, PubSubSource};
use crate::warehouse::{BigQuerySink, StageSnafu};

/// Run the job until shutdown or until the failure budget is spent.
pub async fn run_job(config: JobConfig) -> Result<(), PipelineError> {
    config.validate().context(ConfigSnafu)?;
    log_startup(&config);

    let addr = config
        .metrics_address
        .parse::<SocketAddr>()
        .context(AddressParseSnafu)
        .context(SetupSnafu)?;
    init_metrics(addr).context(MetricsSnafu).context(SetupSnafu)?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());

    let client = reqwest::Client::new();
    let tokens = auth::provider_from_env(client.clone());

    let mut settings = PubSubSettings::new(&config.project_id, &config.pubsub_topic);
    settings.subscription = config.pubsub_subscription.clone();
    settings.ack_deadline_secs = config.ack_deadline_secs;
    let pubsub_tokens: TokenProviderRef = if settings.apply_emulator_env() {
        info!(endpoint = %settings.endpoint, "Using Pub/Sub emulator");
        Arc::new(NoAuth)
    } else {
        tokens.clone()
    };

    let target = config.pubsub_topic.clone();
    let source = tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!(target = %target, "Shutdown requested during initialization");
            return Ok(());
        }

        result = PubSubSource::connect(settings, client.clone(), pubsub_tokens) => result?,
    };
    let source: Arc<dyn NotificationSource> = Arc::new(source);

    let result = run_with_source(&config, source.clone(), client, tokens, shutdown).await;

    if let Err(e) = source.close().await {
        warn!(target = %target, error = %e, "Failed to close notification source");
    }
    result
}

async fn run_with_source(
    config: &JobConfig,
    source: Arc<dyn NotificationSource>,
    client: reqwest::Client,
    tokens: TokenProviderRef,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let target = config.pubsub_topic.as_str();

    let staging = StorageProvider::for_url(&config.temp_fold_script)
        .await
        .context(StageSnafu)
        .context(SinkSnafu)?;
    let sink = BigQuerySink::new(client, tokens, staging, &config.project_id)
        .with_default_dataset(config.default_dataset.clone());

    let dlq = DeadLetterQueue::from_path(config.dlq_path.as_deref())
        .await?
        .map(Arc::new);

    let handler = RecordHandler::new(
        MappingRegistry::new(config.mapping_locator(), config.mapping_cache_ttl()),
        Arc::new(sink),
    );
    let mut processor = Processor::new(
        target,
        source,
        Arc::new(CloudStorageFetchers),
        handler,
        FailureTracker::new(config.max_failures, dlq),
        config.max_messages,
    );

    info!(
        target = %target,
        poll_interval_secs = config.poll_interval_secs,
        max_messages = config.max_messages,
        "Job processor initialized"
    );

    let result = run_polling_loop(
        &mut processor,
        config.poll_interval(),
        config.poll_jitter_secs,
        shutdown,
        target,
    )
    .await;

    processor.finalize().await;
    info!(target = %target, failures = processor.failure_count(), "Job stopped");
    result
}

fn log_startup(config: &JobConfig) {
    info!(
        topic = %config.topic_path(),
        project_id = %config.project_id,
        region = %config.region,
        "Job configuration"
    );
    info!(
        staging_location = %config.staging_location,
        temp_location = %config.temp_location,
        load_staging = %config.temp_fold_script,
        "Storage locations"
    );
    info!(
        mapping = %config.mapping_locator(),
        cache_ttl_secs = config.mapping_cache_ttl_secs,
        "Schema mapping document"
    );
    if !config.pipeline_args.is_empty() {
        info!(args = ?config.pipeline_args, "Ignoring engine options");
    }
}
