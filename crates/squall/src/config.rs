//! Command-line configuration.
//!
//! Every option can also be given through a `SQUALL_*` environment variable.
//! Arguments the job does not know are collected as passthrough engine
//! options instead of being rejected.

use std::ffi::OsString;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use snafu::prelude::*;

use crate::error::{ConfigError, OutOfRangeSnafu};
use crate::locator::Locator;
use crate::source::qualify_topic;
use squall_core::DEFAULT_METRICS_ADDR;

/// Pub/Sub caps a single pull at this many messages.
const MAX_PULL_MESSAGES: usize = 1000;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "squall",
    version,
    about = "Streams Cloud Storage change notifications into warehouse tables"
)]
pub struct JobConfig {
    /// Topic carrying the storage change notifications
    #[arg(long = "pubsub_topic", env = "SQUALL_PUBSUB_TOPIC")]
    pub pubsub_topic: String,

    /// Region the job runs in
    #[arg(long = "region", env = "SQUALL_REGION")]
    pub region: String,

    /// Staging location for job artifacts
    #[arg(long = "staging_location", env = "SQUALL_STAGING_LOCATION")]
    pub staging_location: String,

    /// Temporary location for job state
    #[arg(long = "temp_location", env = "SQUALL_TEMP_LOCATION")]
    pub temp_location: String,

    /// Storage location for staged warehouse load files
    #[arg(long = "temp_fold_script", env = "SQUALL_TEMP_FOLD_SCRIPT")]
    pub temp_fold_script: String,

    /// Project that owns the subscription and runs load jobs
    #[arg(long = "project_id", env = "SQUALL_PROJECT_ID")]
    pub project_id: String,

    /// Bucket holding the schema mapping document
    #[arg(long = "bucket_name_schema", env = "SQUALL_BUCKET_NAME_SCHEMA")]
    pub bucket_name_schema: String,

    /// Path of the schema mapping document inside its bucket
    #[arg(long = "source_schema_path", env = "SQUALL_SOURCE_SCHEMA_PATH")]
    pub source_schema_path: String,

    /// Read from this existing subscription instead of a temporary one
    #[arg(long = "pubsub_subscription", env = "SQUALL_PUBSUB_SUBSCRIPTION")]
    pub pubsub_subscription: Option<String>,

    /// Dataset for table names in the mapping document that have none
    #[arg(long = "default_dataset", env = "SQUALL_DEFAULT_DATASET")]
    pub default_dataset: Option<String>,

    /// Messages pulled per bundle
    #[arg(
        long = "max_messages",
        env = "SQUALL_MAX_MESSAGES",
        default_value_t = 100
    )]
    pub max_messages: usize,

    /// Wait between empty pulls
    #[arg(
        long = "poll_interval_secs",
        env = "SQUALL_POLL_INTERVAL_SECS",
        default_value_t = 1
    )]
    pub poll_interval_secs: u64,

    /// Random extra wait between empty pulls
    #[arg(
        long = "poll_jitter_secs",
        env = "SQUALL_POLL_JITTER_SECS",
        default_value_t = 0
    )]
    pub poll_jitter_secs: u64,

    /// Reuse the mapping document for this long (0 reads it for every record)
    #[arg(
        long = "mapping_cache_ttl_secs",
        env = "SQUALL_MAPPING_CACHE_TTL_SECS",
        default_value_t = 0
    )]
    pub mapping_cache_ttl_secs: u64,

    /// Stop after this many failed records (0 = never)
    #[arg(
        long = "max_failures",
        env = "SQUALL_MAX_FAILURES",
        default_value_t = 0
    )]
    pub max_failures: usize,

    /// Storage location for dead-lettered notifications
    #[arg(long = "dlq_path", env = "SQUALL_DLQ_PATH")]
    pub dlq_path: Option<String>,

    /// Address of the Prometheus endpoint
    #[arg(
        long = "metrics_address",
        env = "SQUALL_METRICS_ADDRESS",
        default_value = DEFAULT_METRICS_ADDR
    )]
    pub metrics_address: String,

    /// Ack deadline of a temporary subscription
    #[arg(
        long = "ack_deadline_secs",
        env = "SQUALL_ACK_DEADLINE_SECS",
        default_value_t = 60
    )]
    pub ack_deadline_secs: u32,

    /// Arguments meant for the execution engine, kept for logging.
    #[arg(skip)]
    pub pipeline_args: Vec<String>,
}

impl JobConfig {
    /// Parse process arguments, setting aside unknown ones.
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.into().to_string_lossy().into_owned())
            .collect();
        let (known, pipeline_args) = split_known_args(&args);

        let mut config = Self::try_parse_from(known)?;
        config.pipeline_args = pipeline_args;
        Ok(config)
    }

    /// Reject out-of-range tuning values. Required options are only
    /// checked for presence, which the parser already does.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            (1..=MAX_PULL_MESSAGES).contains(&self.max_messages),
            OutOfRangeSnafu {
                name: "max_messages",
                message: "must be between 1 and 1000",
            }
        );
        ensure!(
            (10..=600).contains(&self.ack_deadline_secs),
            OutOfRangeSnafu {
                name: "ack_deadline_secs",
                message: "must be between 10 and 600",
            }
        );
        Ok(())
    }

    /// Full `projects/{p}/topics/{t}` path of the notification topic.
    pub fn topic_path(&self) -> String {
        qualify_topic(&self.project_id, &self.pubsub_topic)
    }

    /// Where the schema mapping document lives.
    pub fn mapping_locator(&self) -> Locator {
        Locator::new(
            self.bucket_name_schema.trim_start_matches("gs://").trim_end_matches('/'),
            self.source_schema_path.trim_start_matches('/'),
        )
    }

    pub fn mapping_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.mapping_cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Split `args` (program name first) into arguments this job defines and
/// everything else.
///
/// An unknown `--flag` takes the following argument with it unless that
/// argument is itself a flag or the flag was written `--flag=value`.
pub fn split_known_args(args: &[String]) -> (Vec<String>, Vec<String>) {
    let command = JobConfig::command();
    let takes_value = |name: &str| -> Option<bool> {
        if matches!(name, "help" | "version") {
            return Some(false);
        }
        command
            .get_arguments()
            .find(|a| a.get_long() == Some(name))
            .map(|a| a.get_action().takes_values())
    };

    let mut known = Vec::with_capacity(args.len());
    let mut unknown = Vec::new();
    let mut iter = args.iter().peekable();

    if let Some(program) = iter.next() {
        known.push(program.clone());
    }

    while let Some(arg) = iter.next() {
        if matches!(arg.as_str(), "-h" | "-V") {
            known.push(arg.clone());
            continue;
        }

        let Some(flag) = arg.strip_prefix("--") else {
            unknown.push(arg.clone());
            continue;
        };
        let (name, inline_value) = match flag.split_once('=') {
            Some((name, _)) => (name, true),
            None => (flag, false),
        };

        match takes_value(name) {
            Some(true) => {
                known.push(arg.clone());
                if !inline_value && let Some(value) = iter.next() {
                    known.push(value.clone());
                }
            }
            Some(false) => known.push(arg.clone()),
            None => {
                unknown.push(arg.clone());
                if !inline_value
                    && let Some(value) = iter.next_if(|next| !next.starts_with('-'))
                {
                    unknown.push(value.clone());
                }
            }
        }
    }

    (known, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = [
            "squall",
            "--pubsub_topic",
            "gcs-events",
            "--region",
            "europe-west1",
            "--staging_location",
            "gs://jobs/staging",
            "--temp_location",
            "gs://jobs/tmp",
            "--temp_fold_script",
            "gs://jobs/loads",
            "--project_id",
            "proj",
            "--bucket_name_schema",
            "schemas",
            "--source_schema_path",
            "mapping/schema.json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    #[test]
    fn test_parse_required_flags() {
        let config = JobConfig::from_args(args(&[])).unwrap();

        assert_eq!(config.pubsub_topic, "gcs-events");
        assert_eq!(config.temp_fold_script, "gs://jobs/loads");
        assert_eq!(config.max_messages, 100);
        assert_eq!(config.mapping_cache_ttl_secs, 0);
        assert_eq!(config.metrics_address, DEFAULT_METRICS_ADDR);
        assert!(config.pipeline_args.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_required_flag_fails() {
        let mut argv = args(&[]);
        let at = argv.iter().position(|a| a == "--project_id").unwrap();
        argv.drain(at..at + 2);

        // The env fallback must not be set for this to fail
        if std::env::var("SQUALL_PROJECT_ID").is_err() {
            assert!(JobConfig::from_args(argv).is_err());
        }
    }

    #[test]
    fn test_unknown_args_are_passed_through() {
        let config = JobConfig::from_args(args(&[
            "--runner",
            "DataflowRunner",
            "--streaming",
            "--num_workers=4",
            "--max_messages",
            "50",
        ]))
        .unwrap();

        assert_eq!(config.max_messages, 50);
        assert_eq!(
            config.pipeline_args,
            vec!["--runner", "DataflowRunner", "--streaming", "--num_workers=4"]
        );
    }

    #[test]
    fn test_inline_known_values() {
        let config = JobConfig::from_args(args(&["--dlq_path=gs://jobs/dlq"])).unwrap();
        assert_eq!(config.dlq_path.as_deref(), Some("gs://jobs/dlq"));
    }

    #[test]
    fn test_validate_accepts_blank_values() {
        let mut argv = args(&[]);
        let at = argv.iter().position(|a| a == "--region").unwrap();
        argv[at + 1] = " ".to_string();

        let config = JobConfig::from_args(argv).unwrap();
        assert_eq!(config.region, " ");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = JobConfig::from_args(args(&["--max_messages", "0"])).unwrap();
        assert!(config.validate().is_err());

        let config = JobConfig::from_args(args(&["--ack_deadline_secs", "5"])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_locations() {
        let config = JobConfig::from_args(args(&[])).unwrap();

        assert_eq!(config.topic_path(), "projects/proj/topics/gcs-events");
        assert_eq!(
            config.mapping_locator().to_string(),
            "gs://schemas/mapping/schema.json"
        );
        assert_eq!(config.mapping_cache_ttl(), Duration::ZERO);
    }
}
