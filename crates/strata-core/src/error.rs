//! Core error types for strata.
//!
//! [`StrataError`] covers the infrastructure failures surfaced by the database
//! layer, configuration loading, and serialization. Migration-specific failures
//! live in `strata-migrations` and wrap this type when they need to.

use thiserror::Error;

/// The infrastructure error type shared by all strata crates.
///
/// Variants describe where a failure came from rather than what the caller was
/// trying to do; the migration layer adds that context on top.
#[derive(Error, Debug)]
pub enum StrataError {
    // ── Database errors ──────────────────────────────────────────────

    /// A statement or query was rejected by the database.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational failure (connection refused, pool exhausted, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A query expected exactly one row but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one row but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// Transaction misuse, such as committing with nothing pending.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StrataError {
    /// Returns `true` for errors raised by the database itself or the
    /// connection to it, as opposed to local configuration problems.
    pub const fn is_database(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::OperationalError(_)
                | Self::DoesNotExist(_)
                | Self::MultipleObjectsReturned(_)
                | Self::TransactionError(_)
        )
    }
}

/// A convenience type alias for `Result<T, StrataError>`.
pub type StrataResult<T> = Result<T, StrataError>;
