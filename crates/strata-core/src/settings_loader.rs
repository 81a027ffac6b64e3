//! Settings loading from configuration files.
//!
//! This module loads [`Settings`] from TOML or JSON files and applies
//! environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `STRATA_DEBUG` | `debug` |
//! | `STRATA_LOG_LEVEL` | `log_level` |
//! | `STRATA_DATABASE_NAME` | `database.name` |
//! | `STRATA_DATABASE_HOST` | `database.host` |
//! | `STRATA_DATABASE_PORT` | `database.port` |
//! | `STRATA_DATABASE_USER` | `database.user` |
//! | `STRATA_DATABASE_PASSWORD` | `database.password` |
//! | `STRATA_ADMIN_DATABASE` | `database.admin_database` |
//! | `STRATA_ROADMAP_DIR` | `migrations.roadmap_dir` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use strata_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("strata.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::StrataError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, StrataError> {
    // Go through serde_json::Value so the file can be deep-merged over the
    // serialized defaults.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| StrataError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    let json_value = toml_to_json(toml_value);
    merge_over_defaults(json_value, "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, StrataError> {
    let content = read_file(path.as_ref(), "TOML")?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, StrataError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, StrataError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| StrataError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, StrataError> {
    let content = read_file(path.as_ref(), "JSON")?;
    from_json_str(&content)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<Settings, StrataError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a file, picking the format from its extension
/// (`.json` is JSON, anything else is TOML), then applies environment overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, StrataError> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        from_json_file_with_env(path)
    } else {
        from_toml_file_with_env(path)
    }
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `STRATA_*` environment variable overrides to a settings struct.
///
/// Unparseable numeric values are ignored and leave the setting unchanged.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("STRATA_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Ok(val) = std::env::var("STRATA_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("STRATA_DATABASE_NAME") {
        settings.database.name = val;
    }

    if let Ok(val) = std::env::var("STRATA_DATABASE_HOST") {
        settings.database.host = val;
    }

    if let Ok(val) = std::env::var("STRATA_DATABASE_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            settings.database.port = port;
        }
    }

    if let Ok(val) = std::env::var("STRATA_DATABASE_USER") {
        settings.database.user = val;
    }

    if let Ok(val) = std::env::var("STRATA_DATABASE_PASSWORD") {
        settings.database.password = val;
    }

    if let Ok(val) = std::env::var("STRATA_ADMIN_DATABASE") {
        settings.database.admin_database = Some(val).filter(|v| !v.trim().is_empty());
    }

    if let Ok(val) = std::env::var("STRATA_ROADMAP_DIR") {
        settings.migrations.roadmap_dir = PathBuf::from(val);
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_file(path: &Path, format: &str) -> Result<String, StrataError> {
    std::fs::read_to_string(path).map_err(|e| {
        StrataError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, StrataError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        StrataError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        StrataError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            log_level = "strata=debug"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "strata=debug");
        // Defaults preserved
        assert_eq!(settings.migrations.history_table, "schema_phases");
    }

    #[test]
    fn test_from_toml_str_database() {
        let toml = r#"
            [database]
            name = "shop"
            user = "migrator"
            host = "db.internal"
            port = 6432
            admin_database = "template1"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.database.name, "shop");
        assert_eq!(settings.database.user, "migrator");
        assert_eq!(settings.database.port, 6432);
        assert_eq!(settings.database.admin_database.as_deref(), Some("template1"));
        // Untouched nested fields keep their defaults
        assert_eq!(settings.database.engine, "postgresql");
    }

    #[test]
    fn test_from_toml_str_modules() {
        let toml = r#"
            [migrations]
            roadmap_dir = "db/core"
            history_schema = "meta"

            [[migrations.modules]]
            name = "billing"
            roadmap_dir = "db/billing"

            [[migrations.modules]]
            name = "crm"
            roadmap_dir = "db/crm"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.migrations.roadmap_dir, PathBuf::from("db/core"));
        assert_eq!(settings.migrations.history_schema.as_deref(), Some("meta"));
        assert_eq!(settings.migrations.modules.len(), 2);
        assert_eq!(settings.migrations.modules[1].name, "crm");
        assert_eq!(settings.migrations.staging_prefix, "_staging_");
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.database.name, "strata");
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "debug": false,
            "database": { "name": "inventory" },
            "migrations": { "history_table": "history" }
        }"#;

        let settings = from_json_str(json).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.database.name, "inventory");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.migrations.history_table, "history");
    }

    #[test]
    fn test_from_json_str_invalid() {
        let result = from_json_str("{invalid json");
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "log_level = \"warn\"\n[database]\nname = \"filedb\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.database.name, "filedb");
    }

    #[test]
    fn test_from_file_picks_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"database": {"name": "jsondb"}}"#).unwrap();

        let settings = from_file_with_env(&path).unwrap();
        assert_eq!(settings.database.name, "jsondb");
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/strata.toml");
        assert!(matches!(result, Err(StrataError::ConfigurationError(_))));
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_database_name() {
        let mut settings = Settings::default();
        std::env::set_var("STRATA_DATABASE_NAME", "env-db");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.database.name, "env-db");
        std::env::remove_var("STRATA_DATABASE_NAME");
    }

    #[test]
    fn test_apply_env_overrides_invalid_port() {
        let mut settings = Settings::default();
        std::env::set_var("STRATA_DATABASE_PORT", "not-a-number");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.database.port, 5432);
        std::env::remove_var("STRATA_DATABASE_PORT");
    }

    #[test]
    fn test_apply_env_overrides_blank_admin_database() {
        let mut settings = Settings::default();
        settings.database.admin_database = Some("postgres".into());
        std::env::set_var("STRATA_ADMIN_DATABASE", "  ");
        apply_env_overrides(&mut settings);
        assert!(settings.database.admin_database.is_none());
        std::env::remove_var("STRATA_ADMIN_DATABASE");
    }

    #[test]
    fn test_apply_env_overrides_roadmap_dir() {
        let mut settings = Settings::default();
        std::env::set_var("STRATA_ROADMAP_DIR", "/srv/roadmap");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.migrations.roadmap_dir, PathBuf::from("/srv/roadmap"));
        std::env::remove_var("STRATA_ROADMAP_DIR");
    }

    // ── merge_json helper ───────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_merge_json_array_override() {
        let base = serde_json::json!({"list": [1, 2, 3]});
        let over = serde_json::json!({"list": [4, 5]});
        let merged = merge_json(base, over);
        // Arrays are replaced, not merged
        assert_eq!(merged["list"], serde_json::json!([4, 5]));
    }

    #[test]
    fn test_toml_to_json() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "test"
            count = 42
            flag = true
            [nested]
            key = "value"
        "#,
        )
        .unwrap();

        let json = toml_to_json(toml_val);
        assert_eq!(json["name"], "test");
        assert_eq!(json["count"], 42);
        assert_eq!(json["flag"], true);
        assert_eq!(json["nested"]["key"], "value");
    }
}
