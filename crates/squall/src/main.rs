//! squall CLI: streaming loader for Cloud Storage change notifications.

use std::process::ExitCode;

use tracing::info;

use squall::{JobConfig, init_tracing, run_job};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match JobConfig::from_args(std::env::args_os()) {
        Ok(c) => c,
        Err(e) => e.exit(),
    };

    info!(
        "Starting squall for topic {} (project {})",
        config.pubsub_topic, config.project_id
    );

    match run_job(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Job failed: {e}");
            ExitCode::FAILURE
        }
    }
}
