//! squall: streams Cloud Storage change notifications into warehouse tables.
//!
//! Each notification names an object; the object holds a change envelope
//! whose payload becomes one row in the table the schema mapping document
//! assigns to it.
//!
//! - `source/` - Pub/Sub pull subscriber
//! - `notification` / `locator` - decoding notifications and locating objects
//! - `envelope` / `mapping` - building rows and resolving their tables
//! - `warehouse/` - BigQuery load jobs
//! - `pipeline/` - per-record handling and the bundle processor
//! - `dlq/` - dead letter queue and failure budget

pub mod auth;
pub mod config;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod http;
pub mod locator;
pub mod mapping;
pub mod notification;
pub mod pipeline;
pub mod source;
pub mod warehouse;

pub use config::JobConfig;
pub use error::{PipelineError, RecordError};
pub use pipeline::run_job;
pub use squall_core::{FailureKind, init_tracing};
