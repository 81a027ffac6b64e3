//! A scripted, in-memory database context.
//!
//! [`RecordingContext`] implements [`DatabaseContext`] without a server. It
//! records every statement together with the database it ran against, serves
//! canned query results and copy streams matched by substring, captures the
//! rows written through copy sinks, and fails any statement containing a
//! configured needle.
//!
//! Contexts opened with [`DatabaseContext::connect_to`] share the same
//! recording, so statements against the backup database show up in order
//! next to the ones against the target.
//!
//! ## Example
//!
//! ```rust
//! use strata_db::DatabaseContext;
//! use strata_test::RecordingContext;
//!
//! # tokio_test::block_on(async {
//! let db = RecordingContext::new("shop");
//! db.fail_on("DROP TABLE");
//! db.execute("CREATE TABLE t (id int)", &[]).await.unwrap();
//! assert!(db.execute("DROP TABLE t", &[]).await.is_err());
//! assert_eq!(db.sql(), vec!["CREATE TABLE t (id int)", "DROP TABLE t"]);
//! # });
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::{StrataError, StrataResult};
use strata_db::{
    CopyColumn, DatabaseContext, Enclosure, Row, RowSink, RowSource, TableName, Value,
};

/// One recorded statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// The database the context was attached to.
    pub database: String,
    /// The statement text, or a marker such as `CONNECT shop`.
    pub sql: String,
    /// Bound parameters, empty for unparameterized statements.
    pub params: Vec<Value>,
}

#[derive(Default)]
struct Shared {
    statements: Vec<RecordedStatement>,
    query_results: Vec<(String, Vec<Row>)>,
    copy_sources: Vec<(String, Vec<Vec<Value>>)>,
    copied: Vec<(String, String, Vec<Vec<Value>>)>,
    failures: Vec<String>,
    tables: HashSet<(String, String)>,
}

/// An in-memory [`DatabaseContext`] that records statements.
pub struct RecordingContext {
    shared: Arc<Mutex<Shared>>,
    database: Mutex<String>,
    admin_database: Option<String>,
    in_transaction: AtomicBool,
}

impl RecordingContext {
    /// Creates a context attached to `database` with `postgres` as the
    /// administrative database.
    pub fn new(database: &str) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            database: Mutex::new(database.to_string()),
            admin_database: Some("postgres".to_string()),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Removes the administrative database.
    #[must_use]
    pub fn without_admin(mut self) -> Self {
        self.admin_database = None;
        self
    }

    /// Returns another context on `database` sharing this recording.
    pub fn sibling(&self, database: &str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            database: Mutex::new(database.to_string()),
            admin_database: self.admin_database.clone(),
            in_transaction: AtomicBool::new(false),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> String {
        self.database
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serves `rows` for every query containing `needle`.
    pub fn on_query(&self, needle: &str, rows: Vec<Row>) {
        self.shared().query_results.push((needle.to_string(), rows));
    }

    /// Serves `rows` for every copy-out query containing `needle`.
    pub fn on_copy_out(&self, needle: &str, rows: Vec<Vec<Value>>) {
        self.shared().copy_sources.push((needle.to_string(), rows));
    }

    /// Fails every statement containing `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.shared().failures.push(needle.to_string());
    }

    /// Removes all configured failures.
    pub fn clear_failures(&self) {
        self.shared().failures.clear();
    }

    /// Marks `table` (as displayed by [`TableName`]) as existing in `database`.
    pub fn with_table(&self, database: &str, table: &str) {
        self.shared()
            .tables
            .insert((database.to_string(), table.to_string()));
    }

    /// All recorded statements in execution order.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.shared().statements.clone()
    }

    /// The recorded statement texts in execution order.
    pub fn sql(&self) -> Vec<String> {
        self.shared()
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// The statement texts recorded against `database`.
    pub fn sql_on(&self, database: &str) -> Vec<String> {
        self.shared()
            .statements
            .iter()
            .filter(|s| s.database == database)
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Index of the first statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.shared()
            .statements
            .iter()
            .position(|s| s.sql.contains(needle))
    }

    /// Returns `true` if any statement contains `needle`.
    pub fn executed(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }

    /// Parameters of every statement containing `needle`, in order.
    pub fn params_of(&self, needle: &str) -> Vec<Vec<Value>> {
        self.shared()
            .statements
            .iter()
            .filter(|s| s.sql.contains(needle))
            .map(|s| s.params.clone())
            .collect()
    }

    /// Rows written through finished copy sinks into `table`, in order.
    pub fn copied_rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.shared()
            .copied
            .iter()
            .filter(|(_, t, _)| t == table)
            .flat_map(|(_, _, rows)| rows.iter().cloned())
            .collect()
    }

    /// Clears recorded statements and copied rows, keeping the script.
    pub fn reset(&self) {
        let mut shared = self.shared();
        shared.statements.clear();
        shared.copied.clear();
    }

    fn record(&self, sql: &str) -> StrataResult<()> {
        self.record_with(sql, &[])
    }

    fn record_with(&self, sql: &str, params: &[Value]) -> StrataResult<()> {
        let database = self.current();
        let mut shared = self.shared();
        shared.statements.push(RecordedStatement {
            database,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if shared.failures.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(StrataError::DatabaseError(format!(
                "Simulated failure: {sql}"
            )));
        }
        Ok(())
    }
}

struct RecordingSource {
    rows: VecDeque<Vec<Value>>,
}

#[async_trait::async_trait]
impl RowSource for RecordingSource {
    async fn next_row(&mut self) -> StrataResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }
}

struct RecordingSink {
    shared: Arc<Mutex<Shared>>,
    database: String,
    table: String,
    width: usize,
    rows: Vec<Vec<Value>>,
}

#[async_trait::async_trait]
impl RowSink for RecordingSink {
    async fn write_row(&mut self, row: &[Value]) -> StrataResult<()> {
        if row.len() != self.width {
            return Err(StrataError::DatabaseError(format!(
                "Copy row has {} values, expected {}",
                row.len(),
                self.width
            )));
        }
        self.rows.push(row.to_vec());
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StrataResult<u64> {
        let this = *self;
        let count = this.rows.len() as u64;
        this.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .copied
            .push((this.database, this.table, this.rows));
        Ok(count)
    }
}

#[async_trait::async_trait]
impl DatabaseContext for RecordingContext {
    fn vendor(&self) -> &'static str {
        "recording"
    }

    fn enclosure(&self) -> Enclosure {
        Enclosure::DoubleQuote
    }

    fn database_name(&self) -> String {
        self.current()
    }

    fn admin_database(&self) -> Option<String> {
        self.admin_database.clone()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        self.record_with(sql, params)?;
        Ok(0)
    }

    async fn execute_batch(&self, sql: &str) -> StrataResult<()> {
        self.record(sql)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        self.record_with(sql, params)?;
        Ok(self
            .shared()
            .query_results
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn begin_transaction(&self) -> StrataResult<()> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "A transaction is already open".to_string(),
            ));
        }
        self.record("BEGIN")
    }

    async fn commit(&self) -> StrataResult<()> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "No transaction to commit".to_string(),
            ));
        }
        self.record("COMMIT")
    }

    async fn rollback(&self) -> StrataResult<()> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "No transaction to roll back".to_string(),
            ));
        }
        self.record("ROLLBACK")
    }

    async fn change_database(&self, database: &str) -> StrataResult<()> {
        self.record(&format!("CONNECT {database}"))?;
        *self.database.lock().unwrap_or_else(PoisonError::into_inner) = database.to_string();
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate_connections(&self, database: &str) -> StrataResult<u64> {
        self.record(&format!("TERMINATE {database}"))?;
        Ok(0)
    }

    async fn table_exists(&self, table: &TableName) -> StrataResult<bool> {
        let key = (self.current(), table.to_string());
        Ok(self.shared().tables.contains(&key))
    }

    async fn connect_to(&self, database: &str) -> StrataResult<Box<dyn DatabaseContext>> {
        self.record(&format!("OPEN {database}"))?;
        Ok(Box::new(self.sibling(database)))
    }

    async fn copy_out(
        &self,
        query: &str,
        _columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSource>> {
        self.record(&format!("COPY OUT {query}"))?;
        let rows: VecDeque<Vec<Value>> = self
            .shared()
            .copy_sources
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, rows)| rows.iter().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(RecordingSource { rows }))
    }

    async fn copy_in(
        &self,
        table: &TableName,
        columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSink>> {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        self.record(&format!("COPY IN {table} ({})", names.join(", ")))?;
        Ok(Box::new(RecordingSink {
            shared: Arc::clone(&self.shared),
            database: self.current(),
            table: table.to_string(),
            width: columns.len(),
            rows: Vec::new(),
        }))
    }
}
