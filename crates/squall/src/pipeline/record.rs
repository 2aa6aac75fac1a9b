//! Handling of a single notification, from raw bytes to a loaded row.

use snafu::prelude::*;
use tracing::{debug, info};

use squall_core::emit;
use squall_core::metrics::events::{RecordSkipped, RecordsLoaded};

use crate::envelope::map_envelope;
use crate::error::{FetchSnafu, LoadSnafu, RecordError};
use crate::locator::{Locator, ObjectFetcher};
use crate::mapping::MappingRegistry;
use crate::notification::Notification;
use crate::warehouse::{LoadRequest, WarehouseSinkRef};

/// What became of a successfully handled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// One row was appended to `table`.
    Loaded { table: String },
    /// The object has no entry in the mapping document.
    Skipped { object: String },
}

/// Runs the per-record stages: decode, locate, fetch, map and load.
pub struct RecordHandler {
    mapping: MappingRegistry,
    sink: WarehouseSinkRef,
}

impl RecordHandler {
    pub fn new(mapping: MappingRegistry, sink: WarehouseSinkRef) -> Self {
        Self { mapping, sink }
    }

    /// Decode a raw notification and locate the object it refers to.
    pub fn locate(data: &[u8]) -> Result<Locator, RecordError> {
        let notification = Notification::decode(data)?;
        Locator::from_notification(&notification)
    }

    /// Fetch the located object and load it.
    pub async fn handle(
        &self,
        locator: &Locator,
        fetcher: &dyn ObjectFetcher,
    ) -> Result<RecordOutcome, RecordError> {
        let text = fetcher.fetch_text(locator).await.context(FetchSnafu {
            locator: locator.to_string(),
        })?;
        debug!(%locator, bytes = text.len(), "Fetched object");

        self.map_and_load(&text, &locator.to_string(), fetcher).await
    }

    /// Map fetched envelope text to a row and append it to its table.
    ///
    /// The mapping document is read through `fetcher` so that it shares the
    /// bundle's storage clients.
    pub async fn map_and_load(
        &self,
        text: &str,
        origin: &str,
        fetcher: &dyn ObjectFetcher,
    ) -> Result<RecordOutcome, RecordError> {
        let record = map_envelope(text, origin)?;
        let document = self.mapping.document(fetcher).await?;

        let Some(mapping) = document.lookup(&record.object)? else {
            info!(object = %record.object, "'{}' not mapped in schema document", record.object);
            emit!(RecordSkipped {
                object: record.object.clone(),
            });
            return Ok(RecordOutcome::Skipped {
                object: record.object,
            });
        };

        let request = LoadRequest::append(&mapping.table_name, mapping.schema, vec![record.row]);
        self.sink.load(&request).await.context(LoadSnafu {
            table: &mapping.table_name,
        })?;

        emit!(RecordsLoaded {
            count: 1,
            table: mapping.table_name.clone(),
        });
        debug!(object = %record.object, table = %mapping.table_name, "Loaded row");
        Ok(RecordOutcome::Loaded {
            table: mapping.table_name,
        })
    }
}
