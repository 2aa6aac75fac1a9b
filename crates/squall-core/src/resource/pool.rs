//! Storage client pooling.
//!
//! A pool is a scope for storage clients: one ObjectStore connection per
//! bucket, created on first use and shared by every provider in that bucket.
//! Dropping the pool drops its clients.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use object_store::ObjectStore;

use crate::error::StorageError;
use crate::storage::{BackendConfig, LocalConfig, object_key};
use crate::{StorageProvider, StorageProviderRef};

/// Extracts the bucket identifier from a URL for connection sharing.
pub fn bucket_key(url: &str) -> String {
    let url_lower = url.to_lowercase();

    if let Some(rest) = url_lower.strip_prefix("gs://") {
        let bucket = rest.split('/').next().unwrap_or("");
        return format!("gs://{bucket}");
    }

    if url_lower.starts_with("file://")
        || url_lower.starts_with("file:")
        || url_lower.starts_with('/')
    {
        return "file://".to_string();
    }

    url.to_string()
}

/// Pool of storage connections, shared across providers using the same bucket.
#[derive(Default)]
pub struct StoragePool {
    /// Cached ObjectStore connections keyed by bucket.
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    /// Cached StorageProviders keyed by full URL.
    providers: RwLock<HashMap<String, StorageProviderRef>>,
}

impl std::fmt::Debug for StoragePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePool").finish_non_exhaustive()
    }
}

impl StoragePool {
    /// Create a new empty storage pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a storage provider for the given URL.
    ///
    /// Providers with URLs in the same bucket share the underlying ObjectStore
    /// connection, but each has its own path prefix via `config.key()`.
    pub async fn get_or_create(&self, url: &str) -> Result<StorageProviderRef, StorageError> {
        let provider_key = url.to_lowercase().trim_end_matches('/').to_string();

        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(&provider_key) {
                return Ok(provider.clone());
            }
        }

        let bucket = bucket_key(url);
        let shared = {
            let stores = self.stores.read().await;
            stores.get(&bucket).cloned()
        };

        let object_store = match shared {
            Some(store) => store,
            None => {
                // Connect at the bucket root so every prefix in the bucket can reuse it
                let root = StorageProvider::for_url(&bucket_root(url, &bucket)).await?;
                let mut stores = self.stores.write().await;
                stores
                    .entry(bucket)
                    .or_insert_with(|| root.object_store.clone())
                    .clone()
            }
        };

        let config = match BackendConfig::parse_url(url)? {
            // The shared local connection is rooted at `/`, so the directory becomes the prefix
            BackendConfig::Local(local) => BackendConfig::Local(LocalConfig {
                key: Some(object_key(local.path.trim_start_matches('/'))?),
                ..local
            }),
            other => other,
        };
        let provider = Arc::new(StorageProvider::with_shared_store(
            config,
            object_store,
            url.to_string(),
        ));

        let mut providers = self.providers.write().await;
        Ok(providers.entry(provider_key).or_insert(provider).clone())
    }

    /// Number of cached ObjectStore connections.
    pub async fn store_count(&self) -> usize {
        self.stores.read().await.len()
    }
}

/// Local paths have no bucket; their connection is rooted at `/`.
fn bucket_root(url: &str, bucket: &str) -> String {
    if bucket == "file://" {
        "/".to_string()
    } else if bucket == url.to_lowercase() {
        url.to_string()
    } else {
        bucket.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bucket_key_gcs() {
        assert_eq!(bucket_key("gs://bucket/path/file"), "gs://bucket");
        assert_eq!(bucket_key("gs://raw-events/orders/123.json"), "gs://raw-events");
        assert_eq!(bucket_key("GS://BUCKET/path"), "gs://bucket");
    }

    #[test]
    fn test_bucket_key_local() {
        assert_eq!(bucket_key("file:///tmp/data"), "file://");
        assert_eq!(bucket_key("/tmp/data"), "file://");
    }

    #[test]
    fn test_different_bucket_different_key() {
        let key1 = bucket_key("gs://bucket-a/path/file.json");
        let key2 = bucket_key("gs://bucket-b/path/file.json");
        assert_ne!(key1, key2);
    }

    #[tokio::test]
    async fn test_pool_shares_object_store_for_same_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        std::fs::create_dir_all(base.join("table_a")).unwrap();
        std::fs::create_dir_all(base.join("table_b")).unwrap();

        let pool = StoragePool::new();

        let url_a = format!("{}/table_a", base.display());
        let url_b = format!("{}/table_b", base.display());

        let provider_a = pool.get_or_create(&url_a).await.unwrap();
        let provider_b = pool.get_or_create(&url_b).await.unwrap();

        assert_eq!(pool.store_count().await, 1);
        assert!(!Arc::ptr_eq(&provider_a, &provider_b));
        assert!(Arc::ptr_eq(
            &provider_a.object_store,
            &provider_b.object_store
        ));
    }

    #[tokio::test]
    async fn test_pool_reuses_provider_for_same_url() {
        let temp_dir = TempDir::new().unwrap();
        let url = temp_dir.path().to_str().unwrap();

        let pool = StoragePool::new();
        assert_eq!(pool.store_count().await, 0);

        let provider1 = pool.get_or_create(url).await.unwrap();
        let provider2 = pool.get_or_create(url).await.unwrap();

        assert!(Arc::ptr_eq(&provider1, &provider2));
        assert_eq!(pool.store_count().await, 1);
    }

    #[tokio::test]
    async fn test_pooled_provider_reads_under_its_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        std::fs::create_dir_all(base.join("schemas")).unwrap();
        std::fs::write(base.join("schemas/mapping.json"), "{}").unwrap();

        let pool = StoragePool::new();
        let provider = pool
            .get_or_create(&format!("{}/schemas", base.display()))
            .await
            .unwrap();

        assert_eq!(provider.get_text("mapping.json").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_pooled_provider_reads_special_characters() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        std::fs::create_dir_all(base.join("raw/orders")).unwrap();
        std::fs::write(base.join("raw/orders/a~b.json"), "tilde").unwrap();
        std::fs::write(base.join("raw/orders/file#1.json"), "hash").unwrap();

        let pool = StoragePool::new();
        let provider = pool
            .get_or_create(&format!("{}/raw", base.display()))
            .await
            .unwrap();

        for (name, expected) in [("orders/a~b.json", "tilde"), ("orders/file#1.json", "hash")] {
            let key = object_key(name).unwrap();
            assert_eq!(provider.get_text(key).await.unwrap(), expected);
        }
    }
}
