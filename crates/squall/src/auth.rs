//! Access tokens for the Google REST APIs (Pub/Sub and BigQuery).
//!
//! Cloud Storage goes through object_store, which has its own credential
//! chain; everything else asks a [`TokenProvider`] for a bearer token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::debug;

use crate::http::{self, HttpError};

/// Environment variable holding a pre-minted OAuth access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Errors that can occur while obtaining an access token.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AuthError {
    /// The metadata server could not be reached or refused the request.
    #[snafu(display("Failed to fetch access token from metadata server: {source}"))]
    Metadata { source: HttpError },
}

/// Source of bearer tokens for outgoing API requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns `None` when requests should be sent unauthenticated.
    async fn token(&self) -> Result<Option<String>, AuthError>;
}

pub type TokenProviderRef = Arc<dyn TokenProvider>;

/// No authentication (emulators).
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(None)
    }
}

/// A fixed token, typically from `GOOGLE_OAUTH_ACCESS_TOKEN`.
#[derive(Debug)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Fetches tokens for the default service account from the GCE metadata server.
pub struct MetadataTokenProvider {
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn token(&self) -> Result<Option<String>, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(Some(token.value.clone()));
        }

        let request = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google");
        let fresh: MetadataToken = http::send_json(request).await.context(MetadataSnafu)?;

        debug!(expires_in = fresh.expires_in, "Refreshed access token");
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(Some(fresh.access_token))
    }
}

/// Pick a token provider from the environment.
///
/// `GOOGLE_OAUTH_ACCESS_TOKEN` wins when set; otherwise the metadata server
/// is used, which is where credentials come from on GCP workers.
pub fn provider_from_env(client: reqwest::Client) -> TokenProviderRef {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => {
            debug!("Using access token from {ACCESS_TOKEN_ENV}");
            Arc::new(StaticToken::new(token))
        }
        _ => Arc::new(MetadataTokenProvider::new(client)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_auth_yields_no_token() {
        assert_eq!(NoAuth.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("ya29.token");
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("ya29.token"));
    }

    #[tokio::test]
    async fn test_cached_metadata_token_is_reused() {
        let provider = MetadataTokenProvider::new(reqwest::Client::new());
        *provider.cached.lock().await = Some(CachedToken {
            value: "cached".to_string(),
            refresh_at: Instant::now() + Duration::from_secs(300),
        });

        assert_eq!(provider.token().await.unwrap().as_deref(), Some("cached"));
    }

    #[test]
    fn test_metadata_token_deserializes() {
        let token: MetadataToken = serde_json::from_str(
            r#"{"access_token":"abc","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, 3599);
    }
}
