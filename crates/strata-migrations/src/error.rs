//! Migration-specific error types.

use strata_core::StrataError;
use thiserror::Error;

use crate::version::PhaseVersion;

/// Migration-specific errors.
///
/// Validation variants are raised while roadmaps are loaded and rule maps
/// are built. Execution variants are raised while a migration runs and are
/// always preceded by a rollback attempt. Infrastructure failures from the
/// database context pass through as [`MigrationError::Database`].
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The roadmap has no phases.
    #[error("the roadmap contains no phases")]
    EmptyRoadmap,

    /// Two phases share a version.
    #[error("duplicate phase version {version}")]
    DuplicateVersion {
        /// The repeated version.
        version: PhaseVersion,
    },

    /// The requested target is older than the database.
    #[error("target version {target} is older than the current version {current}")]
    TargetBehindCurrent {
        /// The requested target version.
        target: PhaseVersion,
        /// The version recorded in the database.
        current: PhaseVersion,
    },

    /// A guideline references a table the map does not track.
    #[error("unknown table {table}")]
    UnknownTable {
        /// The table name.
        table: String,
    },

    /// A guideline references a column the table does not track.
    #[error("unknown column {table}.{column}")]
    UnknownColumn {
        /// The table name.
        table: String,
        /// The column name.
        column: String,
    },

    /// A create guideline declares a column that already exists.
    #[error("column {table}.{column} is already defined")]
    DuplicateColumn {
        /// The table name.
        table: String,
        /// The column name.
        column: String,
    },

    /// A delete guideline removes a column a transfer definition writes.
    #[error("column {table}.{column} is used by the transfer definition of {table}")]
    ColumnInUse {
        /// The table name.
        table: String,
        /// The column name.
        column: String,
    },

    /// Two merged maps define a transfer for the same table.
    #[error("table {table} already has a transfer definition")]
    TransferConflict {
        /// The table name.
        table: String,
    },

    /// Two merged maps define a rule for the same column.
    #[error("conflicting rules for {table}.{column}")]
    RuleConflict {
        /// The table name.
        table: String,
        /// The column name.
        column: String,
    },

    /// A created column has no type.
    #[error("column {table}.{column} has no type")]
    MissingType {
        /// The table name.
        table: String,
        /// The column name.
        column: String,
    },

    /// A create guideline orders a table before one the map does not track.
    #[error("table {table} cannot be placed before unknown table {before}")]
    UnknownBeforeTable {
        /// The table being created.
        table: String,
        /// The referenced table.
        before: String,
    },

    /// A roadmap resource could not be parsed or failed validation.
    #[error("invalid roadmap resource {resource}: {reason}")]
    InvalidPhase {
        /// The resource name.
        resource: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A version string is not 1 to 4 dot-separated numbers.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// The roadmap resources could not be enumerated or read.
    #[error("roadmap resources unavailable: {0}")]
    RoadmapUnavailable(String),

    /// An operation was called in a state that does not allow it.
    #[error("cannot {operation} while the migration is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The current state.
        state: String,
    },

    /// The database provider has no administrative database.
    #[error("the {vendor} provider has no administrative database")]
    NoAdminDatabase {
        /// The provider's vendor name.
        vendor: String,
    },

    /// A DDL script failed.
    #[error("DDL script {script} failed: {source}")]
    Script {
        /// The script resource name.
        script: String,
        /// The database error.
        #[source]
        source: StrataError,
    },

    /// A value could not be encoded while copying rows.
    #[error("copying {table}.{column} failed at row {row}: {reason}")]
    CopyFailed {
        /// The table being copied.
        table: String,
        /// The failing column.
        column: String,
        /// The 1-based row number.
        row: u64,
        /// Why the value was rejected.
        reason: String,
    },

    /// The copy channel rejected a row.
    #[error("writing row {row} of {table} failed: {source}")]
    RowWriteFailed {
        /// The table being copied.
        table: String,
        /// The 1-based row number.
        row: u64,
        /// The database error.
        #[source]
        source: StrataError,
    },

    /// Advancing a sequence after a bulk copy failed.
    #[error("resetting the sequence of {table}.{column} failed: {source}")]
    SequenceRepair {
        /// The table name.
        table: String,
        /// The sequence-backed column.
        column: String,
        /// The database error.
        #[source]
        source: StrataError,
    },

    /// A background task building a module roadmap did not complete.
    #[error("module roadmap task failed: {0}")]
    TaskFailed(String),

    /// An infrastructure error from the database context.
    #[error(transparent)]
    Database(#[from] StrataError),

    /// A migration failed and was rolled back.
    #[error("migration aborted and rolled back: {source}")]
    Aborted {
        /// The original failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// The operation was cancelled before it finished.
    #[error("migration cancelled")]
    Cancelled,
}

impl MigrationError {
    /// Returns `true` for errors raised while validating roadmaps and
    /// building rule maps.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyRoadmap
                | Self::DuplicateVersion { .. }
                | Self::TargetBehindCurrent { .. }
                | Self::UnknownTable { .. }
                | Self::UnknownColumn { .. }
                | Self::DuplicateColumn { .. }
                | Self::ColumnInUse { .. }
                | Self::TransferConflict { .. }
                | Self::RuleConflict { .. }
                | Self::MissingType { .. }
                | Self::UnknownBeforeTable { .. }
                | Self::InvalidPhase { .. }
                | Self::InvalidVersion(_)
        )
    }

    /// Converts an error raised during a rolled-back migration into the
    /// error reported to the caller.
    ///
    /// Infrastructure errors are wrapped in [`MigrationError::Aborted`];
    /// migration errors are returned unchanged.
    #[must_use]
    pub fn after_rollback(self) -> Self {
        match self {
            Self::Database(_) => Self::Aborted {
                source: Box::new(self),
            },
            other => other,
        }
    }
}

/// A convenience alias for results with [`MigrationError`].
pub type MigrationResult<T> = Result<T, MigrationError>;
