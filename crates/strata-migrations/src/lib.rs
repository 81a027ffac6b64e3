//! # strata-migrations
//!
//! Phase-based schema migrations. A roadmap is an ordered set of versioned
//! phases, each describing tables to create, columns to update or delete, and
//! tables to fill from a script. The phases a database has not seen yet are
//! folded into a [`DataTransactionMap`], the rules for carrying every column of
//! the old schema into the new one.
//!
//! A migration never alters the live schema. The database is renamed to a
//! backup, rebuilt empty from DDL scripts, and its rows are copied across
//! through staging tables using the binary copy channel. If anything fails the
//! backup is renamed back.
//!
//! ## Module Overview
//!
//! - [`version`] - Dotted phase versions
//! - [`phase`] - Phase resources and their guidelines
//! - [`rule`] - Per-column transfer rules
//! - [`transaction_map`] - The accumulated rule map
//! - [`merger`] - Combining module and core rule maps
//! - [`resources`] - Directory and in-memory resource loaders
//! - [`roadmap`] - Loading, validating, and resolving roadmaps
//! - [`history`] - The schema history table
//! - [`info`] - Human-readable migration plans
//! - [`transaction`] - The database swap and its rollback
//! - [`transfer`] - Copying data into the rebuilt database
//! - [`context`] - The migration state machine
//!
//! ## Example
//!
//! ```rust
//! use strata_migrations::{DataTransactionMap, MigrationPhase};
//!
//! let phase = MigrationPhase::from_json(
//!     "1.0.json",
//!     r#"{
//!         "version": "1.0",
//!         "title": "Users",
//!         "guidelines": {
//!             "create": { "Users": { "columns": { "Id": { "type": "bigint" } } } }
//!         }
//!     }"#,
//! )
//! .unwrap();
//! let map = DataTransactionMap::from_phases(&[phase], None).unwrap();
//! assert!(map.table("Users").is_some());
//! ```

// result_large_err: MigrationError carries context for every failure and is used throughout
// literal_string_with_formatting_args: "{column}" is the rule placeholder, not a format argument
#![allow(clippy::result_large_err)]
#![allow(clippy::literal_string_with_formatting_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::struct_excessive_bools)]

pub mod context;
pub mod error;
pub mod history;
pub mod info;
pub mod merger;
pub mod phase;
pub mod resources;
pub mod roadmap;
pub mod rule;
pub mod transaction;
pub mod transaction_map;
pub mod transfer;
pub mod version;

// Re-export the most commonly used types at the crate root.
pub use context::{
    backup_name, MigrationContext, MigrationOptions, MigrationReport, MigrationState,
    ModuleRoadmap,
};
pub use error::{MigrationError, MigrationResult};
pub use history::{HistoryRecorder, HistoryTable, NewSchemaPhase, SchemaPhase};
pub use info::{MigrationOperationInfo, MigrationRoadmapInfo};
pub use merger::{full_merge, safe_merge, ConflictResolver};
pub use phase::{
    ColumnDefinition, ColumnUpdate, ColumnsDefinition, DataTransferDefinition, Guidelines,
    MigrationPhase,
};
pub use resources::{DirectoryResourceLoader, ResourceLoader, StaticResourceLoader};
pub use roadmap::{DdlScript, Roadmap, RoadmapBuilder, RoadmapProvider};
pub use rule::DataTransactionRule;
pub use transaction::MigrationTransactionManager;
pub use transaction_map::{DataTransactionMap, TableRules};
pub use transfer::{DataTransferEngine, TransferStats};
pub use version::PhaseVersion;
