//! Error types for the squall streaming job.

use snafu::prelude::*;

pub use squall_core::error::{MetricsError, PipelineSetupError, StorageError};
pub use squall_core::FailureKind;

use crate::dlq::DlqError;
use crate::source::SourceError;
use crate::warehouse::SinkError;

/// Errors raised while processing a single notification.
///
/// Each variant maps onto a [`FailureKind`] so the pipeline can decide
/// whether a message is worth redelivering.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordError {
    /// The channel delivered a body whose transport encoding is invalid.
    #[snafu(display("Message body is not valid base64: {source}"))]
    BodyEncoding { source: base64::DecodeError },

    /// Notification body is not UTF-8.
    #[snafu(display("Notification is not valid UTF-8: {source}"))]
    Utf8Decode { source: std::str::Utf8Error },

    /// Notification body is not JSON.
    #[snafu(display("Notification is not valid JSON: {source}"))]
    NotificationJson { source: serde_json::Error },

    /// A JSON document was expected to be an object.
    #[snafu(display("Expected {what} to be a JSON object"))]
    NotAnObject { what: &'static str },

    /// A required key is absent.
    #[snafu(display("Missing field '{field}' in {what}"))]
    MissingField { field: String, what: &'static str },

    /// A key is present but has the wrong type.
    #[snafu(display("Field '{field}' in {what} must be {expected}"))]
    InvalidField {
        field: String,
        what: &'static str,
        expected: &'static str,
    },

    /// Reading the notified object failed.
    #[snafu(display("Failed to read {locator}: {source}"))]
    Fetch {
        locator: String,
        source: StorageError,
    },

    /// Object content is not JSON.
    #[snafu(display("Content of {locator} is not valid JSON: {source}"))]
    EnvelopeJson {
        locator: String,
        source: serde_json::Error,
    },

    /// Reading the schema mapping document failed.
    #[snafu(display("Failed to read schema mapping document {locator}: {source}"))]
    MappingFetch {
        locator: String,
        source: StorageError,
    },

    /// The schema mapping document is not JSON.
    #[snafu(display("Schema mapping document {locator} is not valid JSON: {source}"))]
    MappingJson {
        locator: String,
        source: serde_json::Error,
    },

    /// A mapping entry is unusable (missing table name, bad schema).
    #[snafu(display("Invalid mapping for '{object}': {message}"))]
    InvalidMapping { object: String, message: String },

    /// The warehouse load failed.
    #[snafu(display("Failed to load row into {table}: {source}"))]
    Load { table: String, source: SinkError },
}

impl RecordError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> FailureKind {
        match self {
            RecordError::BodyEncoding { .. }
            | RecordError::Utf8Decode { .. }
            | RecordError::NotificationJson { .. }
            | RecordError::NotAnObject { .. }
            | RecordError::MissingField { .. }
            | RecordError::InvalidField { .. }
            | RecordError::EnvelopeJson { .. } => FailureKind::MalformedInput,
            RecordError::Fetch { source, .. } => storage_kind(source),
            RecordError::MappingFetch { source, .. } => match storage_kind(source) {
                // The document is configuration, not input
                FailureKind::MalformedInput => FailureKind::Downstream,
                kind => kind,
            },
            RecordError::MappingJson { .. }
            | RecordError::InvalidMapping { .. }
            | RecordError::Load { .. } => FailureKind::Downstream,
        }
    }
}

fn storage_kind(source: &StorageError) -> FailureKind {
    if source.is_not_found() {
        FailureKind::NotFound
    } else if matches!(
        source,
        StorageError::NotText { .. } | StorageError::InvalidKey { .. }
    ) {
        FailureKind::MalformedInput
    } else {
        FailureKind::Downstream
    }
}

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A numeric option is out of range.
    #[snafu(display("--{name} {message}"))]
    OutOfRange {
        name: &'static str,
        message: &'static str,
    },
}

/// Top-level job errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Setup error (metrics endpoint).
    #[snafu(display("Setup error: {source}"))]
    Setup { source: PipelineSetupError },

    /// Notification source error.
    #[snafu(display("Notification source error: {source}"))]
    Source { source: SourceError },

    /// Warehouse sink construction error.
    #[snafu(display("Warehouse sink error: {source}"))]
    Sink { source: SinkError },

    /// DLQ error.
    #[snafu(display("DLQ error: {source}"))]
    Dlq { source: DlqError },

    /// Maximum failures exceeded.
    #[snafu(display("Maximum failures exceeded: {count} failures"))]
    MaxFailures { count: usize },
}

impl From<SourceError> for PipelineError {
    fn from(source: SourceError) -> Self {
        PipelineError::Source { source }
    }
}

impl From<DlqError> for PipelineError {
    fn from(source: DlqError) -> Self {
        PipelineError::Dlq { source }
    }
}
