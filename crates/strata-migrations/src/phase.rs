//! Migration phases as read from roadmap resources.
//!
//! A phase resource is a JSON document:
//!
//! ```json
//! {
//!   "version": "2.0.0",
//!   "title": "Split names",
//!   "description": "optional",
//!   "guidelines": {
//!     "create":   { "Users": { "before": "Orders", "condition": null,
//!                              "columns": { "Id": { "type": "bigint", "is_sequence": true } } } },
//!     "update":   { "Users": { "Name": { "column_name": "FullName", "value": "upper({column})" } } },
//!     "delete":   { "Users": ["Legacy"], "Audit": null },
//!     "transfer": { "Totals": { "script": "SELECT ...", "columns": { "Id": "bigint" } } }
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, MigrationResult};
use crate::version::PhaseVersion;

/// One versioned step of a roadmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPhase {
    pub version: PhaseVersion,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub guidelines: Guidelines,
}

/// The schema-change guidelines of a phase, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guidelines {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub create: IndexMap<String, ColumnsDefinition>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub update: IndexMap<String, IndexMap<String, ColumnUpdate>>,
    /// A column list removes those columns; `null` or `[]` removes the table.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub delete: IndexMap<String, Option<Vec<String>>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub transfer: IndexMap<String, DataTransferDefinition>,
}

/// A create guideline for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnsDefinition {
    /// Row filter applied when the table's rows are copied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Places a newly tracked table ahead of this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default)]
    pub columns: IndexMap<String, ColumnDefinition>,
}

/// A column declared by a create guideline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub is_enum: bool,
    #[serde(default)]
    pub is_sequence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
}

/// A change to an existing column. Absent fields keep the tracked value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sequence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_name: Option<String>,
    /// An empty string clears the inherited owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
}

/// A custom read script that fills a table instead of column rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransferDefinition {
    /// Runs against the backup database.
    pub script: String,
    /// Destination columns and their declared types, in script output order.
    pub columns: IndexMap<String, String>,
}

/// Returns the trimmed text, or `None` when it is absent or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

impl MigrationPhase {
    /// Parses and validates a phase resource.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidPhase`] naming `resource` when the
    /// JSON is malformed, the version does not parse, or the phase fails
    /// validation.
    pub fn from_json(resource: &str, text: &str) -> MigrationResult<Self> {
        let phase: Self = serde_json::from_str(text).map_err(|e| MigrationError::InvalidPhase {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;
        phase
            .validate()
            .map_err(|reason| MigrationError::InvalidPhase {
                resource: resource.to_string(),
                reason,
            })?;
        Ok(phase)
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        let g = &self.guidelines;
        for (table, definition) in &g.create {
            check_name("create", table)?;
            for column in definition.columns.keys() {
                check_name(&format!("create {table}"), column)?;
            }
        }
        for (table, columns) in &g.update {
            check_name("update", table)?;
            for column in columns.keys() {
                check_name(&format!("update {table}"), column)?;
            }
        }
        for (table, columns) in &g.delete {
            check_name("delete", table)?;
            for column in columns.iter().flatten() {
                check_name(&format!("delete {table}"), column)?;
            }
        }
        for (table, transfer) in &g.transfer {
            check_name("transfer", table)?;
            if transfer.script.trim().is_empty() {
                return Err(format!("transfer {table} has an empty script"));
            }
            if transfer.columns.is_empty() {
                return Err(format!("transfer {table} declares no columns"));
            }
        }
        Ok(())
    }
}

fn check_name(section: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        Err(format!("{section} contains an empty name"))
    } else {
        Ok(())
    }
}
