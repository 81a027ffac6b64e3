//! # strata-core
//!
//! Core types shared by every strata crate: the infrastructure error type,
//! settings and their loaders, and tracing-based logging setup. This crate has
//! no database dependencies.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Database and migration configuration
//! - [`settings_loader`] - Loading settings from TOML/JSON files and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{StrataError, StrataResult};
pub use settings::{DatabaseSettings, MigrationSettings, ModuleSettings, Settings};
