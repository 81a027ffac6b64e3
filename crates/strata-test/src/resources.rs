//! In-memory roadmap fixtures.
//!
//! [`PhaseBuilder`] writes phase resources in the same JSON layout the
//! roadmap loader reads, and [`MemoryResources`] collects them (plus DDL
//! scripts) as `(name, content)` pairs ready for a static resource loader.
//!
//! ```rust
//! use serde_json::json;
//! use strata_test::{MemoryResources, PhaseBuilder};
//!
//! let resources = MemoryResources::new()
//!     .phase(
//!         PhaseBuilder::new("1.0.0", "Users")
//!             .create("Users", json!({ "Id": { "type": "bigint", "is_sequence": true } })),
//!     )
//!     .script("1.0.0_users.sql", "CREATE TABLE \"Users\" (\"Id\" bigserial);");
//!
//! let entries = resources.into_entries();
//! assert_eq!(entries[0].0, "1.0.0.json");
//! assert_eq!(entries[1].0, "1.0.0_users.sql");
//! ```

use serde_json::{json, Map, Value};

/// Builds the JSON resource of one migration phase.
#[derive(Debug, Clone)]
pub struct PhaseBuilder {
    version: String,
    title: String,
    description: Option<String>,
    create: Map<String, Value>,
    update: Map<String, Value>,
    delete: Map<String, Value>,
    transfer: Map<String, Value>,
}

impl PhaseBuilder {
    /// Starts a phase with a version and title.
    pub fn new(version: &str, title: &str) -> Self {
        Self {
            version: version.to_string(),
            title: title.to_string(),
            description: None,
            create: Map::new(),
            update: Map::new(),
            delete: Map::new(),
            transfer: Map::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Adds a create guideline with only a column map.
    #[must_use]
    pub fn create(mut self, table: &str, columns: Value) -> Self {
        self.create
            .insert(table.to_string(), json!({ "columns": columns }));
        self
    }

    /// Adds a create guideline with a full definition
    /// (`condition`, `before`, `columns`).
    #[must_use]
    pub fn create_with(mut self, table: &str, definition: Value) -> Self {
        self.create.insert(table.to_string(), definition);
        self
    }

    /// Adds an update guideline: a map of column name to update rule.
    #[must_use]
    pub fn update(mut self, table: &str, rules: Value) -> Self {
        self.update.insert(table.to_string(), rules);
        self
    }

    /// Deletes the listed columns of a table.
    #[must_use]
    pub fn delete_columns(mut self, table: &str, columns: &[&str]) -> Self {
        self.delete.insert(table.to_string(), json!(columns));
        self
    }

    /// Deletes a whole table.
    #[must_use]
    pub fn delete_table(mut self, table: &str) -> Self {
        self.delete.insert(table.to_string(), Value::Null);
        self
    }

    /// Adds a transfer definition: a read script and its target columns.
    #[must_use]
    pub fn transfer(mut self, table: &str, script: &str, columns: Value) -> Self {
        self.transfer.insert(
            table.to_string(),
            json!({ "script": script, "columns": columns }),
        );
        self
    }

    /// The resource name, `<version>.json`.
    pub fn resource_name(&self) -> String {
        format!("{}.json", self.version)
    }

    /// The phase as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut guidelines = Map::new();
        for (key, section) in [
            ("create", &self.create),
            ("update", &self.update),
            ("delete", &self.delete),
            ("transfer", &self.transfer),
        ] {
            if !section.is_empty() {
                guidelines.insert(key.to_string(), Value::Object(section.clone()));
            }
        }
        let mut phase = json!({
            "version": self.version,
            "title": self.title,
            "guidelines": guidelines,
        });
        if let Some(description) = &self.description {
            phase["description"] = json!(description);
        }
        phase
    }

    /// The phase as pretty-printed JSON text.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

/// A named set of in-memory roadmap resources.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: Vec<(String, String)>,
}

impl MemoryResources {
    /// Creates an empty resource set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a phase resource.
    #[must_use]
    pub fn phase(mut self, phase: PhaseBuilder) -> Self {
        self.entries.push((phase.resource_name(), phase.to_json()));
        self
    }

    /// Adds a DDL script resource.
    #[must_use]
    pub fn script(mut self, name: &str, sql: &str) -> Self {
        self.entries.push((name.to_string(), sql.to_string()));
        self
    }

    /// Adds a resource with arbitrary content.
    #[must_use]
    pub fn raw(mut self, name: &str, content: &str) -> Self {
        self.entries.push((name.to_string(), content.to_string()));
        self
    }

    /// The resources as `(name, content)` pairs, in insertion order.
    pub fn into_entries(self) -> Vec<(String, String)> {
        self.entries
    }
}
