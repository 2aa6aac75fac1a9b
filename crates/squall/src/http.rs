//! Thin JSON-over-HTTP helpers shared by the Google API clients.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use snafu::prelude::*;

/// Errors from a single HTTP round trip.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HttpError {
    /// Connection or protocol failure.
    #[snafu(display("HTTP request failed: {source}"))]
    Transport { source: reqwest::Error },

    /// The server answered with a non-success status.
    #[snafu(display("HTTP {status}: {body}"))]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[snafu(display("Failed to decode response body: {source}"))]
    Decode { source: reqwest::Error },
}

impl HttpError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpError::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, HttpError::Status { status, .. } if *status == StatusCode::CONFLICT.as_u16())
    }
}

/// Send a request and decode a JSON response body.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, HttpError> {
    let response = send(request).await?;
    response.json().await.context(DecodeSnafu)
}

/// Send a request, discarding the response body.
pub async fn send_empty(request: RequestBuilder) -> Result<(), HttpError> {
    send(request).await.map(|_| ())
}

async fn send(request: RequestBuilder) -> Result<Response, HttpError> {
    let response = request.send().await.context(TransportSnafu)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    StatusSnafu {
        status: status.as_u16(),
        body,
    }
    .fail()
}

/// Attach a bearer token when one is available.
pub fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}
