//! # strata-db-backends
//!
//! Driver implementations of [`strata_db::DatabaseContext`].
//!
//! Supported backends:
//! - `PostgreSQL` (feature `postgres`)

pub mod base;
#[cfg(feature = "postgres")]
pub mod postgresql;

pub use base::DatabaseConfig;
#[cfg(feature = "postgres")]
pub use postgresql::PostgresContext;
