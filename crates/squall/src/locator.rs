//! Object locators and fetching object content by locator.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use squall_core::{StorageError, StoragePool, object_key};

use crate::error::{InvalidFieldSnafu, MissingFieldSnafu, RecordError};
use crate::notification::Notification;

/// Fully qualified location of a stored object: `gs://{bucket}/{object}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    bucket: String,
    object: String,
}

impl Locator {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Build the locator for the object a notification refers to.
    ///
    /// Reads the `name` and `bucket` fields; both must be strings.
    pub fn from_notification(notification: &Notification) -> Result<Self, RecordError> {
        let object = string_field(notification, "name")?;
        let bucket = string_field(notification, "bucket")?;
        Ok(Self::new(bucket, object))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// URL of the containing bucket, e.g. `gs://raw-events`.
    pub fn bucket_url(&self) -> String {
        format!("gs://{}", self.bucket)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

fn string_field(notification: &Notification, field: &str) -> Result<String, RecordError> {
    match notification.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => InvalidFieldSnafu {
            field,
            what: "notification",
            expected: "a string",
        }
        .fail(),
        None => MissingFieldSnafu {
            field,
            what: "notification",
        }
        .fail(),
    }
}

/// Reads the full text content of an object.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch_text(&self, locator: &Locator) -> Result<String, StorageError>;
}

/// Opens a storage client scope for one bundle of records.
///
/// Every record of a bundle is fetched through the same scope; a new bundle
/// gets a new one.
pub trait FetcherFactory: Send + Sync {
    fn open_bundle(&self) -> Box<dyn ObjectFetcher>;
}

/// Storage clients for one bundle, created lazily per bucket.
#[derive(Debug, Default)]
pub struct BundleStorage {
    pool: StoragePool,
}

impl BundleStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets a client has been opened for.
    pub async fn client_count(&self) -> usize {
        self.pool.store_count().await
    }
}

#[async_trait]
impl ObjectFetcher for BundleStorage {
    async fn fetch_text(&self, locator: &Locator) -> Result<String, StorageError> {
        let key = object_key(locator.object())?;
        let provider = self.pool.get_or_create(&locator.bucket_url()).await?;
        provider.get_text(key).await
    }
}

/// Production factory: Cloud Storage clients scoped to each bundle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudStorageFetchers;

impl FetcherFactory for CloudStorageFetchers {
    fn open_bundle(&self) -> Box<dyn ObjectFetcher> {
        Box::new(BundleStorage::new())
    }
}
