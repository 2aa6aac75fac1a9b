//! Object storage abstraction.
//!
//! Provides a unified interface over Google Cloud Storage and the local
//! filesystem, used for fetching notified objects, reading the schema mapping
//! document and staging warehouse load files.

mod gcs;
mod local;
mod url_parser;

pub use url_parser::BackendConfig;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{InvalidKeySnafu, NotTextSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

pub use gcs::GcsConfig;
pub use local::LocalConfig;

/// Parse an object key as written, without percent-encoding any characters.
///
/// Keys taken from notifications must reach the backend byte for byte;
/// `Path::from` would encode characters such as `~` or `#` and drop empty
/// segments.
pub fn object_key(key: &str) -> Result<Path, StorageError> {
    Path::parse(key).context(InvalidKeySnafu { key })
}

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over the supported storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Gcs(config) => Self::construct_gcs(config),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Create a storage provider over an existing ObjectStore connection.
    ///
    /// Multiple providers can share one HTTP connection while having
    /// different path prefixes.
    pub fn with_shared_store(
        config: BackendConfig,
        object_store: Arc<dyn ObjectStore>,
        canonical_url: String,
    ) -> Self {
        Self {
            config,
            object_store,
            canonical_url,
        }
    }

    /// The URL this provider was created for.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;

        record_request(StorageOperation::Get, result.is_ok(), start);

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Get the full contents of a file as UTF-8 text.
    pub async fn get_text(&self, path: impl Into<Path>) -> Result<String, StorageError> {
        let path = path.into();
        let bytes = self.get(path.clone()).await?;
        String::from_utf8(bytes.to_vec()).context(NotTextSnafu {
            path: path.to_string(),
        })
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;

        record_request(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Put raw bytes to a path.
    pub async fn put(&self, path: &Path, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        self.put_payload(path, PutPayload::from(bytes.into())).await
    }

    /// Delete a file at the given path.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.delete(&path).await;

        record_request(StorageOperation::Delete, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

fn record_request(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip_text() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        let path = Path::from("orders/123.json");
        storage.put(&path, r#"{"object":"orders"}"#).await.unwrap();

        let text = storage.get_text(path).await.unwrap();
        assert_eq!(text, r#"{"object":"orders"}"#);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        let err = storage.get("missing.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_text_rejects_binary() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        let path = Path::from("blob.bin");
        storage.put(&path, vec![0xff, 0xfe, 0x00]).await.unwrap();

        let err = storage.get_text(path).await.unwrap_err();
        assert!(matches!(err, StorageError::NotText { .. }));
    }

    #[tokio::test]
    async fn test_object_key_reads_names_verbatim() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("orders")).unwrap();
        std::fs::write(temp_dir.path().join("orders/a~b.json"), "tilde").unwrap();
        std::fs::write(temp_dir.path().join("orders/file#1.json"), "hash").unwrap();

        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        let key = object_key("orders/a~b.json").unwrap();
        assert_eq!(key.as_ref(), "orders/a~b.json");
        assert_eq!(storage.get_text(key).await.unwrap(), "tilde");

        let key = object_key("orders/file#1.json").unwrap();
        assert_eq!(storage.get_text(key).await.unwrap(), "hash");
    }

    #[test]
    fn test_object_key_rejects_empty_segments() {
        let err = object_key("orders//x.json").unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { ref key, .. } if key == "orders//x.json"));

        assert!(object_key("orders/../x.json").is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        let path = Path::from("staging/row.json");
        storage.put(&path, "{}\n").await.unwrap();
        storage.delete(&path).await.unwrap();

        assert!(storage.get(path).await.unwrap_err().is_not_found());
    }
}
