//! Identifier quoting and qualified table names.
//!
//! Every SQL builder receives an [`Enclosure`] explicitly instead of reading
//! a global quoting style.

use std::fmt;

/// The identifier quoting style of a SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enclosure {
    /// `"name"` (PostgreSQL, SQLite, ANSI).
    #[default]
    DoubleQuote,
    /// `` `name` `` (MySQL).
    Backtick,
    /// `[name]` (SQL Server).
    Bracket,
}

impl Enclosure {
    /// Quotes a single identifier, doubling any embedded closing delimiter.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_db::sql::Enclosure;
    ///
    /// assert_eq!(Enclosure::DoubleQuote.quote("Users"), "\"Users\"");
    /// assert_eq!(Enclosure::DoubleQuote.quote("a\"b"), "\"a\"\"b\"");
    /// assert_eq!(Enclosure::Bracket.quote("Users"), "[Users]");
    /// ```
    pub fn quote(self, ident: &str) -> String {
        let (open, close) = match self {
            Self::DoubleQuote => ('"', '"'),
            Self::Backtick => ('`', '`'),
            Self::Bracket => ('[', ']'),
        };
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(open);
        for ch in ident.chars() {
            if ch == close {
                out.push(close);
            }
            out.push(ch);
        }
        out.push(close);
        out
    }

    /// Quotes a possibly schema-qualified table name.
    pub fn quote_table(self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(&table.name)),
            None => self.quote(&table.name),
        }
    }
}

/// Quotes a string literal with single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A table name with an optional schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    /// The schema, or `None` for the connection's search path.
    pub schema: Option<String>,
    /// The unqualified table name.
    pub name: String,
}

impl TableName {
    /// Creates an unqualified table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Creates a schema-qualified table name.
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parses `schema.table` or `table`. Blank schemas are treated as absent.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().split_once('.') {
            Some((schema, name)) if !schema.trim().is_empty() => {
                Self::qualified(schema.trim(), name.trim())
            }
            Some((_, name)) => Self::new(name.trim()),
            None => Self::new(raw.trim()),
        }
    }

    /// Returns a sibling table in the same schema whose name is prefixed.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self {
            schema: self.schema.clone(),
            name: format!("{prefix}{}", self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
