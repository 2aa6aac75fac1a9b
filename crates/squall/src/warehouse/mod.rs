//! Warehouse sink: appending mapped rows to tables.
//!
//! A [`LoadRequest`] carries the rows for one table together with the
//! schema to create it with. [`BigQuerySink`] is the production
//! implementation; tests plug in their own [`WarehouseSink`].

mod bigquery;
mod schema;

pub use bigquery::{BigQuerySink, DEFAULT_BIGQUERY_ENDPOINT, STAGING_PREFIX};
pub use schema::{FieldSchema, TableReference, TableSchema};

use std::sync::Arc;

use async_trait::async_trait;
use snafu::prelude::*;

use crate::auth::AuthError;
use crate::envelope::MappedRow;
use crate::http::HttpError;
use squall_core::StorageError;

/// Errors that can occur while loading rows into the warehouse.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The table name could not be resolved to project, dataset and table.
    #[snafu(display("Invalid table spec '{spec}'"))]
    InvalidTableSpec { spec: String },

    /// The schema descriptor is unusable.
    #[snafu(display("Invalid table schema: {message}"))]
    InvalidSchema { message: String },

    /// Writing or deleting the staged load file failed.
    #[snafu(display("Failed to stage load file: {source}"))]
    Stage { source: StorageError },

    /// A row could not be serialized.
    #[snafu(display("Failed to serialize row: {source}"))]
    Serialize { source: serde_json::Error },

    /// The warehouse API rejected or failed a request.
    #[snafu(display("Warehouse request failed: {source}"))]
    Http { source: HttpError },

    /// The load job completed with an error.
    #[snafu(display("Load job {job_id} failed: {message}"))]
    JobFailed { job_id: String, message: String },

    /// No access token could be obtained.
    #[snafu(display("Failed to authenticate warehouse request: {source}"))]
    Auth { source: AuthError },
}

/// Rows destined for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Table spec as written in the mapping document.
    pub table: String,
    pub schema: TableSchema,
    pub rows: Vec<MappedRow>,
}

impl LoadRequest {
    /// Append rows, creating the table with `schema` if it does not exist.
    pub fn append(table: impl Into<String>, schema: TableSchema, rows: Vec<MappedRow>) -> Self {
        Self {
            table: table.into(),
            schema,
            rows,
        }
    }
}

/// Destination for mapped rows.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Run one load to completion.
    async fn load(&self, request: &LoadRequest) -> Result<(), SinkError>;
}

pub type WarehouseSinkRef = Arc<dyn WarehouseSink>;
