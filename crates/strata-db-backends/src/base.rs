//! Connection configuration shared by the drivers.

use std::collections::HashMap;

use strata_core::settings::DatabaseSettings;
use strata_core::{StrataError, StrataResult};

/// The administrative database PostgreSQL clusters always have.
pub const POSTGRES_ADMIN_DATABASE: &str = "postgres";

/// Configuration for connecting to a database server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// The database to connect to.
    pub name: String,
    /// The database host.
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// The administrative database, if any.
    pub admin_database: Option<String>,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Creates a configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            admin_database: Some(POSTGRES_ADMIN_DATABASE.to_string()),
            options: HashMap::new(),
        }
    }

    /// Builds a configuration from settings.
    ///
    /// An unset administrative database falls back to the engine default;
    /// a blank one disables it.
    pub fn from_settings(settings: &DatabaseSettings) -> StrataResult<Self> {
        match settings.engine.as_str() {
            "postgresql" | "postgres" => {}
            other => {
                return Err(StrataError::ConfigurationError(format!(
                    "Unsupported database engine '{other}'"
                )))
            }
        }
        let admin_database = match &settings.admin_database {
            None => Some(POSTGRES_ADMIN_DATABASE.to_string()),
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name.trim().to_string()),
        };
        Ok(Self {
            name: settings.name.clone(),
            host: Some(settings.host.clone()).filter(|h| !h.is_empty()),
            port: Some(settings.port),
            user: Some(settings.user.clone()).filter(|u| !u.is_empty()),
            password: Some(settings.password.clone()).filter(|p| !p.is_empty()),
            admin_database,
            options: settings.options.clone(),
        })
    }

    /// Returns a copy of this configuration pointed at another database.
    #[must_use]
    pub fn with_database(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}
