//! Mapping fetched change envelopes into warehouse rows.
//!
//! An envelope looks like:
//!
//! ```json
//! {
//!   "payload": {"id": 1, "x": null},
//!   "source_metadata": {"change_type": "INSERT"},
//!   "source_timestamp": "2024-01-01T00:00:00Z",
//!   "object": "orders"
//! }
//! ```
//!
//! The row is the payload plus `action` and `update_date`, with every null
//! value removed. `object` names the entry in the schema mapping document.

use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{
    EnvelopeJsonSnafu, InvalidFieldSnafu, MissingFieldSnafu, NotAnObjectSnafu, RecordError,
};

/// Column receiving `source_metadata.change_type`.
pub const ACTION_COLUMN: &str = "action";
/// Column receiving `source_timestamp`.
pub const UPDATE_DATE_COLUMN: &str = "update_date";

/// A row ready to be appended to a warehouse table.
pub type MappedRow = Map<String, Value>;

/// The result of mapping one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    /// Key into the schema mapping document.
    pub object: String,
    /// Payload with derived columns and without nulls.
    pub row: MappedRow,
}

/// Parse envelope text and build the row it describes.
///
/// `origin` is only used in error messages.
pub fn map_envelope(text: &str, origin: &str) -> Result<MappedRecord, RecordError> {
    let envelope: Value =
        serde_json::from_str(text).context(EnvelopeJsonSnafu { locator: origin })?;
    let Value::Object(envelope) = envelope else {
        return NotAnObjectSnafu { what: "envelope" }.fail();
    };

    let mut row = match required(&envelope, "payload", "envelope")? {
        Value::Object(payload) => payload.clone(),
        _ => {
            return InvalidFieldSnafu {
                field: "payload",
                what: "envelope",
                expected: "an object",
            }
            .fail();
        }
    };

    let change_type = match required(&envelope, "source_metadata", "envelope")? {
        Value::Object(metadata) => required(metadata, "change_type", "source_metadata")?,
        _ => {
            return InvalidFieldSnafu {
                field: "source_metadata",
                what: "envelope",
                expected: "an object",
            }
            .fail();
        }
    };
    let timestamp = required(&envelope, "source_timestamp", "envelope")?;

    row.insert(ACTION_COLUMN.to_string(), change_type.clone());
    row.insert(UPDATE_DATE_COLUMN.to_string(), timestamp.clone());
    row.retain(|_, value| !value.is_null());

    let object = match required(&envelope, "object", "envelope")? {
        Value::String(object) => object.clone(),
        _ => {
            return InvalidFieldSnafu {
                field: "object",
                what: "envelope",
                expected: "a string",
            }
            .fail();
        }
    };

    Ok(MappedRecord { object, row })
}

fn required<'a>(
    map: &'a Map<String, Value>,
    field: &str,
    what: &'static str,
) -> Result<&'a Value, RecordError> {
    map.get(field).context(MissingFieldSnafu { field, what })
}
