//! The database context trait.
//!
//! [`DatabaseContext`] is the bridge between the migration engine
//! (`strata-migrations`) and concrete drivers (`strata-db-backends`). It
//! covers plain statements, explicit transactions, switching the active
//! database, and binary copy channels in both directions.
//!
//! A context holds exactly one live connection to its current database.
//! Reading a second database at the same time goes through
//! [`DatabaseContext::connect_to`], which returns an independent context.

use strata_core::{StrataError, StrataResult};

use crate::codec::ColumnCodec;
use crate::row::Row;
use crate::sql::{Enclosure, TableName};
use crate::value::Value;

/// A column of a copy stream together with its resolved codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyColumn {
    /// The column name in the table (copy in) or result set (copy out).
    pub name: String,
    /// The wire codec for values of this column.
    pub codec: ColumnCodec,
}

impl CopyColumn {
    /// Creates a copy column, resolving fallback codecs to their wire form.
    pub fn new(name: impl Into<String>, codec: ColumnCodec) -> Self {
        Self {
            name: name.into(),
            codec: codec.wire(),
        }
    }
}

/// A stream of rows produced by a binary `COPY ... TO STDOUT`.
#[async_trait::async_trait]
pub trait RowSource: Send {
    /// Returns the next row in source-cursor order, or `None` at the end.
    async fn next_row(&mut self) -> StrataResult<Option<Vec<Value>>>;
}

/// A sink accepting rows for a binary `COPY ... FROM STDIN`.
#[async_trait::async_trait]
pub trait RowSink: Send {
    /// Writes one row. Values must already be encoded for the sink's codecs.
    async fn write_row(&mut self, row: &[Value]) -> StrataResult<()>;

    /// Completes the copy, returning the number of rows written.
    async fn finish(self: Box<Self>) -> StrataResult<u64>;
}

/// Async access to one database connection.
#[async_trait::async_trait]
pub trait DatabaseContext: Send + Sync {
    /// A short vendor name, e.g. `"postgresql"`.
    fn vendor(&self) -> &'static str;

    /// The identifier quoting style of this provider.
    fn enclosure(&self) -> Enclosure;

    /// The database the context is currently connected to.
    fn database_name(&self) -> String;

    /// The administrative database used while the target is renamed or
    /// dropped, if one is configured.
    fn admin_database(&self) -> Option<String>;

    /// Runs a statement that does not return rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64>;

    /// Runs one or more `;`-separated statements without parameters.
    async fn execute_batch(&self, sql: &str) -> StrataResult<()>;

    /// Runs a query and returns all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>>;

    /// Runs a query that must return exactly one row.
    async fn query_one(&self, sql: &str, params: &[Value]) -> StrataResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Err(StrataError::DoesNotExist(format!(
                "Query returned no rows: {sql}"
            ))),
            1 => Ok(rows.remove(0)),
            n => Err(StrataError::MultipleObjectsReturned(format!(
                "Query returned {n} rows, expected one: {sql}"
            ))),
        }
    }

    /// Opens an explicit transaction on the current connection.
    async fn begin_transaction(&self) -> StrataResult<()>;

    /// Commits the open transaction.
    ///
    /// Fails with [`StrataError::TransactionError`] when none is open.
    async fn commit(&self) -> StrataResult<()>;

    /// Rolls back the open transaction.
    ///
    /// Fails with [`StrataError::TransactionError`] when none is open.
    async fn rollback(&self) -> StrataResult<()>;

    /// Drops the current connection and connects to another database.
    async fn change_database(&self, database: &str) -> StrataResult<()>;

    /// Terminates every other session connected to `database`.
    async fn terminate_connections(&self, database: &str) -> StrataResult<u64>;

    /// Returns `true` if the table exists in the current database.
    async fn table_exists(&self, table: &TableName) -> StrataResult<bool>;

    /// Opens an independent context on another database of the same server.
    async fn connect_to(&self, database: &str) -> StrataResult<Box<dyn DatabaseContext>>;

    /// Starts a binary copy of `query`'s result set.
    async fn copy_out(
        &self,
        query: &str,
        columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSource>>;

    /// Starts a binary copy into `table`'s listed columns.
    async fn copy_in(
        &self,
        table: &TableName,
        columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSink>>;
}
