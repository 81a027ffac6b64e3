//! Query result rows.

use strata_core::StrataError;

use crate::value::Value;

/// A single result row: column names paired with values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the raw values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, StrataError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                StrataError::DatabaseError(format!("Column '{column}' not found in row"))
            })?;
        T::from_value(&self.values[idx])
    }

    /// Gets a typed value by column index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the value cannot be
    /// converted to the requested type.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> Result<T, StrataError> {
        if idx >= self.values.len() {
            return Err(StrataError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            )));
        }
        T::from_value(&self.values[idx])
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> Result<Self, StrataError>;
}

fn mismatch(expected: &str, value: &Value) -> StrataError {
    StrataError::DatabaseError(format!("Expected {expected}, got {}", value.kind()))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::Int(i) => i32::try_from(*i).map_err(|e| {
                StrataError::DatabaseError(format!("Int value out of i32 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::DateTime(dt) => Ok(dt.and_utc()),
            _ => Err(mismatch("DateTimeTz", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, StrataError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}
