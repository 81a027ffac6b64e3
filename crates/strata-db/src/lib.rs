//! # strata-db
//!
//! The database contracts the migration engine is written against. Concrete
//! drivers live in `strata-db-backends`; this crate only defines the shapes.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`row`] - Query result rows and typed extraction
//! - [`sql`] - Identifier quoting ([`Enclosure`](sql::Enclosure)) and table names
//! - [`codec`] - Per-column binary copy codecs resolved from type names
//! - [`context`] - The [`DatabaseContext`](context::DatabaseContext) trait and copy channels
//! - [`schema`] - Table definitions and the DDL [`SchemaBuilder`](schema::SchemaBuilder)
//! - [`types`] - Host type to provider type-name mapping

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::format_push_string)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_truncation)]

pub mod codec;
pub mod context;
pub mod row;
pub mod schema;
pub mod sql;
pub mod types;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use codec::ColumnCodec;
pub use context::{CopyColumn, DatabaseContext, RowSink, RowSource};
pub use row::{FromValue, Row};
pub use schema::{
    ColumnSpec, Constraint, PostgresSchemaBuilder, SchemaBuilder, SequenceRef, TableDefinition,
};
pub use sql::{Enclosure, TableName};
pub use types::{HostType, PostgresTypeMapper, TypeMapper};
pub use value::Value;
