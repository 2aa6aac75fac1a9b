//! The schema mapping document: object name to destination table and schema.
//!
//! ```json
//! {"orders": {"table_name": "orders_tbl", "schema": "id:INTEGER"}}
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use snafu::prelude::*;

use squall_core::emit;
use squall_core::metrics::events::MappingDocumentFetched;

use crate::error::{InvalidMappingSnafu, MappingFetchSnafu, MappingJsonSnafu, RecordError};
use crate::locator::{Locator, ObjectFetcher};
use crate::warehouse::TableSchema;

/// Destination of a mapped object.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    pub table_name: String,
    pub schema: TableSchema,
}

/// A parsed schema mapping document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingDocument {
    entries: Map<String, Value>,
}

impl MappingDocument {
    pub fn parse(text: &str, origin: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(text).context(MappingJsonSnafu { locator: origin })?;
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            _ => InvalidMappingSnafu {
                object: "*",
                message: format!("{origin} is not a JSON object"),
            }
            .fail(),
        }
    }

    /// Look up the destination for `object`.
    ///
    /// Returns `Ok(None)` when the document has no entry for it. An entry that
    /// exists but cannot be used is an error.
    pub fn lookup(&self, object: &str) -> Result<Option<TableMapping>, RecordError> {
        let Some(entry) = self.entries.get(object) else {
            return Ok(None);
        };

        let invalid = |message: String| InvalidMappingSnafu { object, message }.build();

        let Value::Object(entry) = entry else {
            return Err(invalid("entry is not an object".to_string()));
        };
        let table_name = match entry.get("table_name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(_) => return Err(invalid("table_name must be a non-empty string".to_string())),
            None => return Err(invalid("missing table_name".to_string())),
        };
        let schema = entry
            .get("schema")
            .ok_or_else(|| invalid("missing schema".to_string()))?;
        let schema = TableSchema::from_descriptor(schema).map_err(|e| invalid(e.to_string()))?;

        Ok(Some(TableMapping { table_name, schema }))
    }
}

/// Reads the mapping document from its fixed location.
///
/// With a zero TTL the document is read on every call. Otherwise the last
/// copy is reused until it is older than the TTL.
#[derive(Debug)]
pub struct MappingRegistry {
    locator: Locator,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Arc<MappingDocument>)>>,
}

impl MappingRegistry {
    pub fn new(locator: Locator, ttl: Duration) -> Self {
        Self {
            locator,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Current mapping document, read through `fetcher` when not cached.
    pub async fn document(
        &self,
        fetcher: &dyn ObjectFetcher,
    ) -> Result<Arc<MappingDocument>, RecordError> {
        if let Some(document) = self.cached_document() {
            emit!(MappingDocumentFetched { cached: true });
            return Ok(document);
        }

        let origin = self.locator.to_string();
        let text = fetcher
            .fetch_text(&self.locator)
            .await
            .context(MappingFetchSnafu { locator: &origin })?;
        let document = Arc::new(MappingDocument::parse(&text, &origin)?);
        emit!(MappingDocumentFetched { cached: false });

        if !self.ttl.is_zero() {
            self.store(document.clone());
        }
        Ok(document)
    }

    /// Drop the cached copy so the next call reads storage.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn cached_document(&self) -> Option<Arc<MappingDocument>> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut cached = self.cached.lock().ok()?;
        match cached.as_ref() {
            Some((fetched_at, document)) if fetched_at.elapsed() < self.ttl => {
                Some(document.clone())
            }
            Some(_) => {
                *cached = None;
                None
            }
            None => None,
        }
    }

    fn store(&self, document: Arc<MappingDocument>) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((Instant::now(), document));
        }
    }
}
