//! Loading settings and opening the database for a CLI run.

use std::path::Path;
use std::sync::Arc;

use strata_core::{settings_loader, Settings, StrataResult};
use strata_db::DatabaseContext;
use strata_db_backends::{DatabaseConfig, PostgresContext};

/// Read when `--settings` is not given and the file exists.
pub const DEFAULT_SETTINGS_FILE: &str = "strata.toml";

/// Loads settings from `path`, from `strata.toml` when present, or from
/// defaults. `STRATA_*` environment variables override all three.
pub fn load_settings(path: Option<&Path>) -> StrataResult<Settings> {
    match path {
        Some(path) => settings_loader::from_file_with_env(path),
        None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
            settings_loader::from_file_with_env(DEFAULT_SETTINGS_FILE)
        }
        None => Ok(settings_loader::from_env()),
    }
}

/// Opens the configured database. No connection is made until the first
/// statement runs.
pub fn connect(settings: &Settings) -> StrataResult<Arc<dyn DatabaseContext>> {
    let config = DatabaseConfig::from_settings(&settings.database)?;
    tracing::info!(
        database = %config.name,
        host = ?config.host,
        admin = ?config.admin_database,
        "Opening database"
    );
    Ok(Arc::new(PostgresContext::from_config(config)?))
}
