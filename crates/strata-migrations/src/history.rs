//! The persisted schema history.
//!
//! Every successful migration appends one row for the core roadmap and one
//! per module, each module row pointing at the core row through `Parent`.
//! The highest recorded version per package is the database's current
//! version for that roadmap.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use strata_core::MigrationSettings;
use strata_db::{
    ColumnSpec, Constraint, DatabaseContext, Enclosure, HostType, Row, TableDefinition,
    TableName, TypeMapper, Value,
};
use tracing::debug;

use crate::error::{MigrationError, MigrationResult};
use crate::phase::{ColumnDefinition, ColumnsDefinition, Guidelines, MigrationPhase};
use crate::version::PhaseVersion;

/// The version of the phase that describes the history table itself.
pub const HISTORY_PHASE_VERSION: &str = "0.0.0";

const COLUMNS: [&str; 8] = [
    "Id",
    "Version",
    "Package",
    "Parent",
    "Title",
    "Description",
    "Summary",
    "Applied",
];

/// One persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaPhase {
    pub id: i64,
    pub version: String,
    /// `None` for the core roadmap.
    pub package: Option<String>,
    /// The core row a module row belongs to.
    pub parent: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub summary: String,
    pub applied: DateTime<Utc>,
}

impl SchemaPhase {
    fn from_row(row: &Row) -> MigrationResult<Self> {
        Ok(Self {
            id: row.get("Id")?,
            version: row.get("Version")?,
            package: row.get("Package")?,
            parent: row.get("Parent")?,
            title: row.get("Title")?,
            description: row.get("Description")?,
            summary: row.get("Summary")?,
            applied: row.get("Applied")?,
        })
    }
}

/// A history row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchemaPhase {
    pub version: PhaseVersion,
    pub package: Option<String>,
    pub parent: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub summary: String,
}

/// The versions a database is currently at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentVersions {
    pub core: Option<PhaseVersion>,
    pub modules: HashMap<String, PhaseVersion>,
}

impl CurrentVersions {
    /// The current version of a module.
    pub fn module(&self, name: &str) -> Option<&PhaseVersion> {
        self.modules.get(name)
    }
}

/// Name and shape of the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTable {
    name: TableName,
}

impl HistoryTable {
    pub const fn new(name: TableName) -> Self {
        Self { name }
    }

    pub fn from_settings(settings: &MigrationSettings) -> Self {
        let name = match settings.history_schema.as_deref().map(str::trim) {
            Some(schema) if !schema.is_empty() => {
                TableName::qualified(schema, settings.history_table.trim())
            }
            _ => TableName::new(settings.history_table.trim()),
        };
        Self { name }
    }

    pub const fn name(&self) -> &TableName {
        &self.name
    }

    /// The table definition, with column types from `types`.
    pub fn definition(&self, types: &dyn TypeMapper) -> TableDefinition {
        let text = types.type_name(HostType::String);
        let id = types.type_name(HostType::I64);
        TableDefinition::new(self.name.clone())
            .column(ColumnSpec::new("Id", id).auto_increment())
            .column(ColumnSpec::new("Version", text))
            .column(ColumnSpec::new("Package", text).nullable())
            .column(ColumnSpec::new("Parent", id).nullable())
            .column(ColumnSpec::new("Title", text))
            .column(ColumnSpec::new("Description", text).nullable())
            .column(ColumnSpec::new("Summary", text))
            .column(
                ColumnSpec::new("Applied", types.type_name(HostType::DateTimeTz))
                    .default_sql("CURRENT_TIMESTAMP"),
            )
            .constraint(Constraint::PrimaryKey {
                columns: vec!["Id".to_string()],
            })
            .constraint(Constraint::ForeignKey {
                columns: vec!["Parent".to_string()],
                references: self.name.clone(),
                referenced_columns: vec!["Id".to_string()],
            })
            .constraint(Constraint::Unique {
                name: None,
                columns: vec!["Package".to_string(), "Version".to_string()],
            })
    }

    /// A phase that creates the history table, so its rows are carried
    /// across a migration like any other table.
    pub fn phase(&self, types: &dyn TypeMapper) -> MigrationPhase {
        let columns: IndexMap<String, ColumnDefinition> = self
            .definition(types)
            .columns
            .into_iter()
            .map(|column| {
                let definition = ColumnDefinition {
                    type_name: Some(column.type_name),
                    is_sequence: column.auto_increment,
                    ..ColumnDefinition::default()
                };
                (column.name, definition)
            })
            .collect();
        let mut guidelines = Guidelines::default();
        guidelines.create.insert(
            self.name.to_string(),
            ColumnsDefinition {
                condition: None,
                before: None,
                columns,
            },
        );
        MigrationPhase {
            version: PhaseVersion::zero(),
            title: "Schema history".to_string(),
            description: None,
            guidelines,
        }
    }
}

/// Reads and appends history rows.
pub struct HistoryRecorder<'a> {
    db: &'a dyn DatabaseContext,
    table: &'a HistoryTable,
}

impl<'a> HistoryRecorder<'a> {
    pub fn new(db: &'a dyn DatabaseContext, table: &'a HistoryTable) -> Self {
        Self { db, table }
    }

    fn quoted(&self) -> (Enclosure, String) {
        let enclosure = self.db.enclosure();
        (enclosure, enclosure.quote_table(self.table.name()))
    }

    /// Returns `true` when the history table exists in the current database.
    ///
    /// # Errors
    ///
    /// Passes through database errors.
    pub async fn exists(&self) -> MigrationResult<bool> {
        Ok(self.db.table_exists(self.table.name()).await?)
    }

    /// Every history row, oldest first. Empty when the table does not exist.
    ///
    /// # Errors
    ///
    /// Passes through database errors and rows that do not map.
    pub async fn list(&self) -> MigrationResult<Vec<SchemaPhase>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        let (enclosure, table) = self.quoted();
        let columns: Vec<String> = COLUMNS.iter().map(|c| enclosure.quote(c)).collect();
        let sql = format!(
            "SELECT {} FROM {table} ORDER BY {}",
            columns.join(", "),
            enclosure.quote("Id")
        );
        debug!(%sql, "Reading schema history");
        self.db
            .query(&sql, &[])
            .await?
            .iter()
            .map(SchemaPhase::from_row)
            .collect()
    }

    /// The highest recorded version of the core roadmap and of each module.
    ///
    /// # Errors
    ///
    /// Fails when a recorded version does not parse.
    pub async fn current_versions(&self) -> MigrationResult<CurrentVersions> {
        if !self.exists().await? {
            return Ok(CurrentVersions::default());
        }
        let (enclosure, table) = self.quoted();
        let sql = format!(
            "SELECT {}, {} FROM {table}",
            enclosure.quote("Version"),
            enclosure.quote("Package")
        );
        let mut current = CurrentVersions::default();
        for row in self.db.query(&sql, &[]).await? {
            let version: PhaseVersion = row.get::<String>("Version")?.parse()?;
            match row.get::<Option<String>>("Package")? {
                None => {
                    if current.core.as_ref().map_or(true, |core| version > *core) {
                        current.core = Some(version);
                    }
                }
                Some(package) => {
                    let slot = current
                        .modules
                        .entry(package)
                        .or_insert_with(|| version.clone());
                    if version > *slot {
                        *slot = version;
                    }
                }
            }
        }
        Ok(current)
    }

    /// The id of the row recorded for `package` at `version`, if any.
    ///
    /// # Errors
    ///
    /// Passes through database errors.
    pub async fn find_id(
        &self,
        package: Option<&str>,
        version: &PhaseVersion,
    ) -> MigrationResult<Option<i64>> {
        let (enclosure, table) = self.quoted();
        let package_column = enclosure.quote("Package");
        let mut params = vec![Value::from(version.to_string())];
        let package_filter = match package {
            Some(name) => {
                params.push(Value::from(name));
                format!("{package_column} = $2")
            }
            None => format!("{package_column} IS NULL"),
        };
        let sql = format!(
            "SELECT {} FROM {table} WHERE {} = $1 AND {package_filter}",
            enclosure.quote("Id"),
            enclosure.quote("Version")
        );
        match self.db.query(&sql, &params).await?.first() {
            Some(row) => Ok(Some(row.get::<i64>("Id")?)),
            None => Ok(None),
        }
    }

    /// Appends a row and returns its id.
    ///
    /// # Errors
    ///
    /// Passes through database errors.
    pub async fn insert(&self, entry: &NewSchemaPhase) -> MigrationResult<i64> {
        let (enclosure, table) = self.quoted();
        let columns: Vec<String> = COLUMNS[1..7].iter().map(|c| enclosure.quote(c)).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            columns.join(", "),
            enclosure.quote("Id")
        );
        let params = [
            Value::from(entry.version.to_string()),
            Value::from(entry.package.clone()),
            Value::from(entry.parent),
            Value::from(entry.title.clone()),
            Value::from(entry.description.clone()),
            Value::from(entry.summary.clone()),
        ];
        let row = self.db.query_one(&sql, &params).await?;
        let id = row.get::<i64>("Id").map_err(MigrationError::from)?;
        debug!(id, version = %entry.version, package = ?entry.package, "Recorded schema phase");
        Ok(id)
    }
}
