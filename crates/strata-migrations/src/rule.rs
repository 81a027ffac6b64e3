//! Per-column data transaction rules.

use std::fmt;

use serde::Serialize;

/// The token in a rule value that is replaced by the source column reference.
pub const PLACEHOLDER: &str = "{column}";

/// How one column's data is carried from the backup into the new schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataTransactionRule {
    /// The type the column has after the migration.
    pub type_name: String,
    /// The type the column has in the database being migrated.
    pub current_type: String,
    /// A pending rename; the map key stays the current name until it is applied.
    pub column_name: Option<String>,
    /// A pending SQL expression; may contain [`PLACEHOLDER`].
    pub value: Option<String>,
    /// The column does not exist in the database being migrated.
    pub is_new: bool,
    pub is_enum: bool,
    pub is_sequence: bool,
    pub sequence_name: Option<String>,
    /// The table owning the sequence when it is not this one.
    pub inherits: Option<String>,
}

impl DataTransactionRule {
    /// The destination column name for the rule stored under `key`.
    pub fn target_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.column_name.as_deref().unwrap_or(key)
    }

    /// Folds a new pending expression into this rule's pending value.
    ///
    /// When both exist, the placeholder in `next` is replaced by the previous
    /// expression so the transformations compose in phase order.
    pub fn compose_value(previous: Option<&str>, next: Option<&str>) -> Option<String> {
        match (next, previous) {
            (Some(next), Some(previous)) => Some(next.replace(PLACEHOLDER, previous)),
            (Some(next), None) => Some(next.to_string()),
            (None, previous) => previous.map(ToString::to_string),
        }
    }
}

impl fmt::Display for DataTransactionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current_type)?;
        if self.type_name != self.current_type {
            write!(f, " -> {}", self.type_name)?;
        }
        if let Some(name) = &self.column_name {
            write!(f, " as {name}")?;
        }
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        if self.is_new {
            f.write_str(" [new]")?;
        }
        if self.is_enum {
            f.write_str(" [enum]")?;
        }
        if self.is_sequence {
            match &self.sequence_name {
                Some(name) => write!(f, " [sequence {name}]")?,
                None => f.write_str(" [sequence]")?,
            }
        }
        if let Some(owner) = &self.inherits {
            write!(f, " [inherits {owner}]")?;
        }
        Ok(())
    }
}
