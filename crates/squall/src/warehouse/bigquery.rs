//! BigQuery load-job sink.
//!
//! Rows are written as newline-delimited JSON to the staging location,
//! loaded with a `jobs.insert` load job and polled until the job is done.
//! The staged file is removed afterwards whatever the outcome.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use object_store::path::Path;
use serde::Deserialize;
use serde_json::{Value, json};
use snafu::prelude::*;
use tracing::{debug, warn};
use uuid::Uuid;

use squall_core::StorageProvider;
use squall_core::emit;
use squall_core::metrics::events::LoadJobCompleted;

use super::{
    AuthSnafu, HttpSnafu, JobFailedSnafu, LoadRequest, SerializeSnafu, SinkError, StageSnafu,
    TableReference, WarehouseSink,
};
use crate::auth::TokenProviderRef;
use crate::envelope::MappedRow;
use crate::http;

/// Public BigQuery REST endpoint.
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Directory under the staging location that holds load files.
pub const STAGING_PREFIX: &str = "squall";

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Loads only ever append, creating the table on first use.
const WRITE_DISPOSITION: &str = "WRITE_APPEND";
const CREATE_DISPOSITION: &str = "CREATE_IF_NEEDED";

/// Loads rows into BigQuery through staged load jobs.
pub struct BigQuerySink {
    client: reqwest::Client,
    tokens: TokenProviderRef,
    staging: StorageProvider,
    endpoint: String,
    project_id: String,
    default_dataset: Option<String>,
    poll_interval: Duration,
}

impl BigQuerySink {
    pub fn new(
        client: reqwest::Client,
        tokens: TokenProviderRef,
        staging: StorageProvider,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            staging,
            endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            project_id: project_id.into(),
            default_dataset: None,
            poll_interval: JOB_POLL_INTERVAL,
        }
    }

    /// Dataset used for table names without one.
    pub fn with_default_dataset(mut self, dataset: Option<String>) -> Self {
        self.default_dataset = dataset;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn token(&self) -> Result<Option<String>, SinkError> {
        self.tokens.token().await.context(AuthSnafu)
    }

    async fn insert_job(&self, body: &Value) -> Result<JobResource, SinkError> {
        let url = format!("{}/projects/{}/jobs", self.endpoint, self.project_id);
        let token = self.token().await?;
        let request = http::authorize(self.client.post(url).json(body), token.as_deref());
        http::send_json(request).await.context(HttpSnafu)
    }

    async fn get_job(
        &self,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource, SinkError> {
        let url = format!(
            "{}/projects/{}/jobs/{}",
            self.endpoint, self.project_id, job_id
        );
        let mut request = self.client.get(url);
        if let Some(location) = location {
            request = request.query(&[("location", location)]);
        }
        let token = self.token().await?;
        let request = http::authorize(request, token.as_deref());
        http::send_json(request).await.context(HttpSnafu)
    }

    async fn wait_for_job(&self, mut job: JobResource) -> Result<(), SinkError> {
        while !job.status.is_done() {
            tokio::time::sleep(self.poll_interval).await;
            job = self
                .get_job(&job.job_reference.job_id, job.job_reference.location.as_deref())
                .await?;
        }

        match job.status.error_result {
            Some(error) => JobFailedSnafu {
                job_id: job.job_reference.job_id,
                message: error.message,
            }
            .fail(),
            None => Ok(()),
        }
    }

    async fn run_load(
        &self,
        table: &TableReference,
        request: &LoadRequest,
        source_uri: &str,
    ) -> Result<(), SinkError> {
        let job_id = format!("squall_load_{}", Uuid::new_v4().simple());
        let body = load_job_body(&self.project_id, &job_id, table, request, source_uri)?;

        let job = self.insert_job(&body).await?;
        debug!(job_id = %job.job_reference.job_id, table = %table, "Submitted load job");
        self.wait_for_job(job).await
    }
}

#[async_trait]
impl WarehouseSink for BigQuerySink {
    async fn load(&self, request: &LoadRequest) -> Result<(), SinkError> {
        let table = TableReference::parse(
            &request.table,
            &self.project_id,
            self.default_dataset.as_deref(),
        )?;

        let staged = Path::from(format!("{STAGING_PREFIX}/{}.json", Uuid::new_v4()));
        let body = to_ndjson(&request.rows)?;
        self.staging.put(&staged, body).await.context(StageSnafu)?;
        let source_uri = format!(
            "{}/{}",
            self.staging.canonical_url().trim_end_matches('/'),
            staged
        );

        let start = Instant::now();
        let result = self.run_load(&table, request, &source_uri).await;
        emit!(LoadJobCompleted {
            table: table.to_string(),
            duration: start.elapsed(),
            success: result.is_ok(),
        });

        if let Err(e) = self.staging.delete(&staged).await {
            warn!(uri = %source_uri, error = %e, "Failed to remove staged load file");
        }

        result
    }
}

/// Serialize rows as newline-delimited JSON.
fn to_ndjson(rows: &[MappedRow]) -> Result<String, SinkError> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row).context(SerializeSnafu)?);
        out.push('\n');
    }
    Ok(out)
}

/// Request body for a `jobs.insert` load job.
fn load_job_body(
    project_id: &str,
    job_id: &str,
    table: &TableReference,
    request: &LoadRequest,
    source_uri: &str,
) -> Result<Value, SinkError> {
    let schema = serde_json::to_value(&request.schema).context(SerializeSnafu)?;
    let destination = serde_json::to_value(table).context(SerializeSnafu)?;

    Ok(json!({
        "jobReference": {
            "projectId": project_id,
            "jobId": job_id,
        },
        "configuration": {
            "load": {
                "sourceUris": [source_uri],
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "destinationTable": destination,
                "schema": schema,
                "writeDisposition": WRITE_DISPOSITION,
                "createDisposition": CREATE_DISPOSITION,
            }
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

impl JobStatus {
    fn is_done(&self) -> bool {
        self.state == "DONE"
    }
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::TableSchema;
    use serde_json::Map;

    fn row(value: Value) -> MappedRow {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_ndjson_one_line_per_row() {
        let rows = vec![
            row(json!({"id": 1, "action": "INSERT"})),
            row(json!({"id": 2})),
        ];

        let text = to_ndjson(&rows).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"id": 1, "action": "INSERT"})
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_load_job_body() {
        let schema = TableSchema::parse_compact("id:INTEGER").unwrap();
        let request = LoadRequest::append("orders_tbl", schema, vec![row(json!({"id": 1}))]);
        let table = TableReference::parse("raw.orders_tbl", "proj", None).unwrap();

        let body = load_job_body(
            "proj",
            "squall_load_1",
            &table,
            &request,
            "gs://tmp/squall/1.json",
        )
        .unwrap();

        let load = &body["configuration"]["load"];
        assert_eq!(body["jobReference"]["jobId"], "squall_load_1");
        assert_eq!(load["sourceUris"], json!(["gs://tmp/squall/1.json"]));
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(
            load["destinationTable"],
            json!({"projectId": "proj", "datasetId": "raw", "tableId": "orders_tbl"})
        );
        assert_eq!(
            load["schema"],
            json!({"fields": [{"name": "id", "type": "INTEGER", "mode": "NULLABLE"}]})
        );
    }

    #[test]
    fn test_job_status_parsing() {
        let job: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "proj", "jobId": "j1", "location": "EU"},
            "status": {"state": "DONE", "errorResult": {"reason": "invalid", "message": "bad row"}}
        }))
        .unwrap();

        assert!(job.status.is_done());
        assert_eq!(job.job_reference.location.as_deref(), Some("EU"));
        assert_eq!(job.status.error_result.unwrap().message, "bad row");

        let job: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "proj", "jobId": "j2"},
            "status": {"state": "RUNNING"}
        }))
        .unwrap();
        assert!(!job.status.is_done());
    }

    mod load_job {
        use std::sync::Arc;

        use mockito::{Matcher, Server};
        use tempfile::TempDir;

        use super::*;
        use crate::auth::NoAuth;
        use crate::http::HttpError;

        async fn sink(server: &Server, staging: &TempDir) -> BigQuerySink {
            let staging = StorageProvider::for_url(staging.path().to_str().unwrap())
                .await
                .unwrap();
            let mut sink =
                BigQuerySink::new(reqwest::Client::new(), Arc::new(NoAuth), staging, "proj")
                    .with_default_dataset(Some("raw".to_string()))
                    .with_endpoint(server.url());
            sink.poll_interval = Duration::ZERO;
            sink
        }

        fn request() -> LoadRequest {
            let schema = TableSchema::parse_compact("id:INTEGER").unwrap();
            LoadRequest::append("orders_tbl", schema, vec![row(json!({"id": 1}))])
        }

        fn staged_files(staging: &TempDir) -> usize {
            std::fs::read_dir(staging.path().join(STAGING_PREFIX))
                .map(|dir| dir.count())
                .unwrap_or(0)
        }

        fn job(state: &str, error: Option<&str>) -> String {
            let mut status = json!({"state": state});
            if let Some(message) = error {
                status["errorResult"] = json!({"reason": "invalid", "message": message});
            }
            json!({
                "jobReference": {"projectId": "proj", "jobId": "j1", "location": "EU"},
                "status": status
            })
            .to_string()
        }

        #[tokio::test]
        async fn test_load_waits_for_running_job() {
            let mut server = Server::new_async().await;
            let staging = TempDir::new().unwrap();

            let insert = server
                .mock("POST", "/projects/proj/jobs")
                .match_body(Matcher::PartialJson(json!({
                    "configuration": {"load": {
                        "sourceFormat": "NEWLINE_DELIMITED_JSON",
                        "destinationTable": {
                            "projectId": "proj",
                            "datasetId": "raw",
                            "tableId": "orders_tbl"
                        },
                        "writeDisposition": "WRITE_APPEND",
                        "createDisposition": "CREATE_IF_NEEDED"
                    }}
                })))
                .with_status(200)
                .with_body(job("RUNNING", None))
                .create_async()
                .await;
            let poll = server
                .mock("GET", "/projects/proj/jobs/j1")
                .match_query(Matcher::UrlEncoded("location".into(), "EU".into()))
                .with_status(200)
                .with_body(job("DONE", None))
                .expect(1)
                .create_async()
                .await;

            sink(&server, &staging).await.load(&request()).await.unwrap();

            insert.assert_async().await;
            poll.assert_async().await;
            assert_eq!(staged_files(&staging), 0);
        }

        #[tokio::test]
        async fn test_failed_job_is_reported() {
            let mut server = Server::new_async().await;
            let staging = TempDir::new().unwrap();

            let insert = server
                .mock("POST", "/projects/proj/jobs")
                .with_status(200)
                .with_body(job("DONE", Some("bad row")))
                .create_async()
                .await;

            let err = sink(&server, &staging)
                .await
                .load(&request())
                .await
                .unwrap_err();

            insert.assert_async().await;
            match err {
                SinkError::JobFailed { job_id, message } => {
                    assert_eq!(job_id, "j1");
                    assert_eq!(message, "bad row");
                }
                other => panic!("expected JobFailed, got {other:?}"),
            }
            assert_eq!(staged_files(&staging), 0);
        }

        #[tokio::test]
        async fn test_rejected_insert_removes_staged_file() {
            let mut server = Server::new_async().await;
            let staging = TempDir::new().unwrap();

            let insert = server
                .mock("POST", "/projects/proj/jobs")
                .with_status(400)
                .with_body(r#"{"error": {"message": "Invalid schema"}}"#)
                .create_async()
                .await;

            let err = sink(&server, &staging)
                .await
                .load(&request())
                .await
                .unwrap_err();

            insert.assert_async().await;
            assert!(matches!(
                err,
                SinkError::Http {
                    source: HttpError::Status { status: 400, .. }
                }
            ));
            assert_eq!(staged_files(&staging), 0);
        }
    }
}
