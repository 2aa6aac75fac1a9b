//! Decoding of storage change notifications.
//!
//! A notification arrives as raw bytes: UTF-8 text holding a JSON object
//! that describes the changed object (at least `name` and `bucket`).

use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{NotAnObjectSnafu, NotificationJsonSnafu, RecordError, Utf8DecodeSnafu};

/// A decoded notification: the key-value body of the message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    fields: Map<String, Value>,
}

impl Notification {
    /// Decode raw message bytes as UTF-8, then parse the text as a JSON object.
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        let text = std::str::from_utf8(data).context(Utf8DecodeSnafu)?;
        let value: Value = serde_json::from_str(text).context(NotificationJsonSnafu)?;

        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => NotAnObjectSnafu {
                what: "notification",
            }
            .fail(),
        }
    }

    /// Look up a field of the notification body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
