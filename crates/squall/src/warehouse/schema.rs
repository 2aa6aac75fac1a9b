//! Table references and table schemas as accepted by the mapping document.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use super::{InvalidSchemaSnafu, InvalidTableSpecSnafu, SinkError};

/// Mode applied to fields declared in the compact string form.
const DEFAULT_MODE: &str = "NULLABLE";

/// A single column of a table schema, in the warehouse's REST shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nested fields of a RECORD column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: Some(DEFAULT_MODE.to_string()),
            description: None,
            fields: Vec::new(),
        }
    }
}

/// Schema of a destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Parse a schema descriptor from the mapping document.
    ///
    /// Two shapes are accepted:
    /// - the compact string form `"id:INTEGER,name:STRING"` (every field
    ///   NULLABLE)
    /// - an object `{"fields": [{"name": ..., "type": ..., "mode": ...}]}`
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, SinkError> {
        match descriptor {
            Value::String(text) => Self::parse_compact(text),
            Value::Object(_) => {
                let schema: TableSchema = serde_json::from_value(descriptor.clone())
                    .map_err(|e| SinkError::InvalidSchema {
                        message: e.to_string(),
                    })?;
                ensure!(
                    !schema.fields.is_empty(),
                    InvalidSchemaSnafu {
                        message: "schema has no fields"
                    }
                );
                Ok(schema)
            }
            _ => InvalidSchemaSnafu {
                message: "expected a string or an object with 'fields'",
            }
            .fail(),
        }
    }

    /// Parse the compact `name:TYPE,name:TYPE` form.
    pub fn parse_compact(text: &str) -> Result<Self, SinkError> {
        let mut fields = Vec::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((name, field_type)) = entry.split_once(':') else {
                return InvalidSchemaSnafu {
                    message: format!("field '{entry}' is not of the form name:TYPE"),
                }
                .fail();
            };
            let (name, field_type) = (name.trim(), field_type.trim());
            ensure!(
                !name.is_empty() && !field_type.is_empty(),
                InvalidSchemaSnafu {
                    message: format!("field '{entry}' is not of the form name:TYPE"),
                }
            );
            fields.push(FieldSchema::new(name, field_type));
        }

        ensure!(
            !fields.is_empty(),
            InvalidSchemaSnafu {
                message: "schema has no fields"
            }
        );
        Ok(Self { fields })
    }
}

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    /// Resolve a table spec from the mapping document.
    ///
    /// Accepts `project:dataset.table`, `project.dataset.table`,
    /// `dataset.table` (in `default_project`) and a bare `table` when a
    /// default dataset is configured.
    pub fn parse(
        spec: &str,
        default_project: &str,
        default_dataset: Option<&str>,
    ) -> Result<Self, SinkError> {
        let invalid = || InvalidTableSpecSnafu { spec }.build();
        let spec_trimmed = spec.trim();

        let (project, rest) = match spec_trimmed.split_once(':') {
            Some((project, rest)) => (Some(project), rest),
            None => (None, spec_trimmed),
        };

        let parts: Vec<&str> = rest.split('.').collect();
        let (project, dataset, table) = match (project, parts.as_slice()) {
            (Some(project), [dataset, table]) => (project, *dataset, *table),
            (None, [project, dataset, table]) => (*project, *dataset, *table),
            (None, [dataset, table]) => (default_project, *dataset, *table),
            (None, [table]) => (default_project, default_dataset.ok_or_else(invalid)?, *table),
            _ => return Err(invalid()),
        };

        if [project, dataset, table].iter().any(|p| p.trim().is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            project_id: project.to_string(),
            dataset_id: dataset.to_string(),
            table_id: table.to_string(),
        })
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}
