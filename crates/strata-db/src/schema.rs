//! Table definitions and DDL generation.
//!
//! The [`SchemaBuilder`] trait turns [`TableDefinition`]s and database-level
//! operations into SQL text for one dialect. Builders never execute anything;
//! callers hand the statements to a [`DatabaseContext`](crate::DatabaseContext).

use crate::codec::normalize_type_name;
use crate::sql::{quote_literal, Enclosure, TableName};

/// One column of a [`TableDefinition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    /// A raw SQL default expression.
    pub default: Option<String>,
    /// Backed by a sequence owned by the column.
    pub auto_increment: bool,
}

impl ColumnSpec {
    /// Creates a `NOT NULL` column.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: false,
            default: None,
            auto_increment: false,
        }
    }

    /// Allows NULL values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets a raw SQL default expression.
    #[must_use]
    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Backs the column with an owned sequence.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// A table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    PrimaryKey {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        references: TableName,
        referenced_columns: Vec<String>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<String>,
    },
    Check {
        name: Option<String>,
        expression: String,
    },
}

/// A table to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: TableName,
    pub columns: Vec<ColumnSpec>,
    pub constraints: Vec<Constraint>,
}

impl TableDefinition {
    /// Creates an empty definition.
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Appends a constraint.
    #[must_use]
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// How to locate the sequence behind a column when resetting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceRef<'a> {
    /// The sequence owned by `column` of `table`.
    Owned { table: &'a TableName, column: &'a str },
    /// An explicitly named, possibly schema-qualified, sequence.
    Named(&'a str),
}

/// Generates dialect-specific DDL.
pub trait SchemaBuilder: Send + Sync {
    /// `CREATE TABLE` for a definition.
    fn create_table(&self, table: &TableDefinition, enclosure: Enclosure) -> String;

    /// `DROP TABLE`, optionally guarded by `IF EXISTS`.
    fn drop_table(&self, table: &TableName, if_exists: bool, enclosure: Enclosure) -> String;

    /// `CREATE DATABASE`.
    fn create_database(&self, name: &str, enclosure: Enclosure) -> String;

    /// `DROP DATABASE IF EXISTS`.
    fn drop_database(&self, name: &str, enclosure: Enclosure) -> String;

    /// Renames a database.
    fn rename_database(&self, from: &str, to: &str, enclosure: Enclosure) -> String;

    /// Moves a sequence to the current maximum of `column` in `table`.
    ///
    /// An empty table leaves the sequence so that the next value is 1.
    fn reset_sequence(
        &self,
        table: &TableName,
        column: &str,
        sequence: SequenceRef<'_>,
        enclosure: Enclosure,
    ) -> String;
}

/// PostgreSQL DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSchemaBuilder;

impl PostgresSchemaBuilder {
    fn column_sql(column: &ColumnSpec, enclosure: Enclosure) -> String {
        let mut sql = format!(
            "{} {}",
            enclosure.quote(&column.name),
            serial_type(&column.type_name, column.auto_increment)
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {default}"));
        }
        sql
    }

    fn constraint_sql(constraint: &Constraint, enclosure: Enclosure) -> String {
        let cols = |names: &[String]| {
            names
                .iter()
                .map(|c| enclosure.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match constraint {
            Constraint::PrimaryKey { columns } => format!("PRIMARY KEY ({})", cols(columns)),
            Constraint::ForeignKey {
                columns,
                references,
                referenced_columns,
            } => format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                cols(columns),
                enclosure.quote_table(references),
                cols(referenced_columns)
            ),
            Constraint::Unique { name, columns } => match name {
                Some(n) => format!("CONSTRAINT {} UNIQUE ({})", enclosure.quote(n), cols(columns)),
                None => format!("UNIQUE ({})", cols(columns)),
            },
            Constraint::Check { name, expression } => match name {
                Some(n) => format!("CONSTRAINT {} CHECK ({expression})", enclosure.quote(n)),
                None => format!("CHECK ({expression})"),
            },
        }
    }
}

/// Maps integer types to their serial counterparts for auto-increment columns.
fn serial_type(type_name: &str, auto_increment: bool) -> String {
    if !auto_increment {
        return type_name.to_string();
    }
    match normalize_type_name(type_name).as_str() {
        "smallint" | "int2" => "smallserial".to_string(),
        "int" | "int4" | "integer" => "serial".to_string(),
        "bigint" | "int8" => "bigserial".to_string(),
        _ => type_name.to_string(),
    }
}

impl SchemaBuilder for PostgresSchemaBuilder {
    fn create_table(&self, table: &TableDefinition, enclosure: Enclosure) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| Self::column_sql(c, enclosure))
            .collect();
        parts.extend(
            table
                .constraints
                .iter()
                .map(|c| Self::constraint_sql(c, enclosure)),
        );
        format!(
            "CREATE TABLE {} ({})",
            enclosure.quote_table(&table.name),
            parts.join(", ")
        )
    }

    fn drop_table(&self, table: &TableName, if_exists: bool, enclosure: Enclosure) -> String {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        format!("DROP TABLE {guard}{}", enclosure.quote_table(table))
    }

    fn create_database(&self, name: &str, enclosure: Enclosure) -> String {
        format!("CREATE DATABASE {}", enclosure.quote(name))
    }

    fn drop_database(&self, name: &str, enclosure: Enclosure) -> String {
        format!("DROP DATABASE IF EXISTS {}", enclosure.quote(name))
    }

    fn rename_database(&self, from: &str, to: &str, enclosure: Enclosure) -> String {
        format!(
            "ALTER DATABASE {} RENAME TO {}",
            enclosure.quote(from),
            enclosure.quote(to)
        )
    }

    fn reset_sequence(
        &self,
        table: &TableName,
        column: &str,
        sequence: SequenceRef<'_>,
        enclosure: Enclosure,
    ) -> String {
        // The regclass arguments are parsed as identifiers, so they carry
        // their own quoting inside the literal to keep case.
        let target = match sequence {
            SequenceRef::Owned {
                table: owner,
                column: owner_column,
            } => format!(
                "pg_get_serial_sequence({}, {})",
                quote_literal(&enclosure.quote_table(owner)),
                quote_literal(owner_column)
            ),
            SequenceRef::Named(name) => {
                quote_literal(&enclosure.quote_table(&TableName::parse(name)))
            }
        };
        let col = enclosure.quote(column);
        format!(
            "SELECT setval({target}, COALESCE(MAX({col}), 1), MAX({col}) IS NOT NULL) FROM {}",
            enclosure.quote_table(table)
        )
    }
}
