//! Settings for strata.
//!
//! [`Settings`] holds the database connection parameters and the migration
//! layout (where roadmaps live, which modules exist, where history is stored).
//! Every field has a default so partial configuration files are accepted.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The database engine (only `postgresql` ships with strata).
    pub engine: String,
    /// The database to migrate.
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// The administrative database used while the target is renamed or
    /// dropped. `None` means the engine's default.
    pub admin_database: Option<String>,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "postgresql".to_string(),
            name: "strata".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            admin_database: None,
            options: HashMap::new(),
        }
    }
}

/// A pluggable module with its own independently versioned roadmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// The module name, persisted as the history row's package.
    pub name: String,
    /// Directory containing the module's phase and script resources.
    pub roadmap_dir: PathBuf,
}

/// Migration layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Directory containing the core roadmap's phase and script resources.
    pub roadmap_dir: PathBuf,
    /// Module roadmaps, merged alongside the core roadmap.
    pub modules: Vec<ModuleSettings>,
    /// Name of the schema-history table.
    pub history_table: String,
    /// Optional schema of the schema-history table.
    pub history_schema: Option<String>,
    /// Prefix of transient staging tables created during data copy.
    pub staging_prefix: String,
    /// Marker placed in the backup database name.
    pub backup_suffix: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            roadmap_dir: PathBuf::from("roadmap"),
            modules: Vec::new(),
            history_table: "schema_phases".to_string(),
            history_schema: None,
            staging_prefix: "_staging_".to_string(),
            backup_suffix: "backup".to_string(),
        }
    }
}

/// The complete set of strata settings.
///
/// # Examples
///
/// ```
/// use strata_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.migrations.history_table, "schema_phases");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode (pretty logs) is enabled.
    pub debug: bool,
    /// The log level or `EnvFilter` directive.
    pub log_level: String,
    /// The database to migrate.
    pub database: DatabaseSettings,
    /// The migration layout.
    pub migrations: MigrationSettings,
    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
            migrations: MigrationSettings::default(),
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Returns the module settings with the given name.
    pub fn module(&self, name: &str) -> Option<&ModuleSettings> {
        self.migrations.modules.iter().find(|m| m.name == name)
    }
}
