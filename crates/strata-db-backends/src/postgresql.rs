//! PostgreSQL database context using `tokio-postgres` and `deadpool-postgres`.
//!
//! [`PostgresContext`] keeps a single-connection pool for the database it is
//! currently attached to. Because the pool never hands out a second
//! connection, `BEGIN`/`COMMIT` issued through [`DatabaseContext::execute`]
//! apply to the same session as the statements between them. Switching
//! databases replaces the pool.
//!
//! Bulk copy uses the binary `COPY` protocol through
//! [`BinaryCopyOutStream`] and [`BinaryCopyInWriter`]. A copy sink holds the
//! pooled connection until it is finished, so no other statement may be run
//! on the same context while a sink is open.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use strata_core::{StrataError, StrataResult};
use strata_db::{
    ColumnCodec, CopyColumn, DatabaseContext, Enclosure, Row, RowSink, RowSource, TableName, Value,
};
use tokio_postgres::binary_copy::{BinaryCopyInWriter, BinaryCopyOutRow, BinaryCopyOutStream};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::base::DatabaseConfig;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// A NULL parameter that binds to a column of any type.
#[derive(Debug)]
struct AnyNull;

impl ToSql for AnyNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A PostgreSQL database context.
pub struct PostgresContext {
    config: DatabaseConfig,
    active: Mutex<ActiveDatabase>,
    in_transaction: AtomicBool,
}

struct ActiveDatabase {
    name: String,
    pool: deadpool_postgres::Pool,
}

impl PostgresContext {
    /// Creates a context attached to `config.name`.
    ///
    /// No connection is opened until the first statement runs.
    pub fn from_config(config: DatabaseConfig) -> StrataResult<Self> {
        let pool = Self::create_pool(&config)?;
        Ok(Self {
            active: Mutex::new(ActiveDatabase {
                name: config.name.clone(),
                pool,
            }),
            config,
            in_transaction: AtomicBool::new(false),
        })
    }

    fn create_pool(config: &DatabaseConfig) -> StrataResult<deadpool_postgres::Pool> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host.clone_from(&config.host);
        pg_config.port = config.port;
        pg_config.user.clone_from(&config.user);
        pg_config.password.clone_from(&config.password);
        pg_config.application_name = Some(
            config
                .options
                .get("application_name")
                .cloned()
                .unwrap_or_else(|| "strata".to_string()),
        );
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(1));

        pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| StrataError::OperationalError(format!("Failed to create pool: {e}")))
    }

    fn pool(&self) -> deadpool_postgres::Pool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pool
            .clone()
    }

    async fn client(&self) -> StrataResult<deadpool_postgres::Object> {
        self.pool()
            .get()
            .await
            .map_err(|e| StrataError::OperationalError(format!("Pool error: {e}")))
    }

    /// Converts query parameters to `tokio-postgres` parameters.
    fn value_to_sql_params(params: &[Value]) -> Vec<BoxedParam> {
        params
            .iter()
            .map(|v| -> BoxedParam {
                match v {
                    Value::Null => Box::new(AnyNull),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::Date(d) => Box::new(*d),
                    Value::DateTime(dt) => Box::new(*dt),
                    Value::DateTimeTz(dt) => Box::new(*dt),
                    Value::Time(t) => Box::new(*t),
                    Value::Uuid(u) => Box::new(*u),
                    Value::Json(j) => Box::new(j.clone()),
                }
            })
            .collect()
    }

    fn param_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
        params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }

    /// Converts a `tokio_postgres::Row` to a strata [`Row`].
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| match *col.type_() {
                Type::BOOL => pg_row
                    .try_get::<_, Option<bool>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bool),
                Type::INT2 => pg_row
                    .try_get::<_, Option<i16>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::from),
                Type::INT4 => pg_row
                    .try_get::<_, Option<i32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::from),
                Type::INT8 => pg_row
                    .try_get::<_, Option<i64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Int),
                Type::FLOAT4 => pg_row
                    .try_get::<_, Option<f32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::from),
                Type::FLOAT8 => pg_row
                    .try_get::<_, Option<f64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Float),
                Type::BYTEA => pg_row
                    .try_get::<_, Option<Vec<u8>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bytes),
                Type::UUID => pg_row
                    .try_get::<_, Option<uuid::Uuid>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Uuid),
                Type::DATE => pg_row
                    .try_get::<_, Option<chrono::NaiveDate>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Date),
                Type::TIMESTAMP => pg_row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::DateTime),
                Type::TIMESTAMPTZ => pg_row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::DateTimeTz),
                Type::TIME => pg_row
                    .try_get::<_, Option<chrono::NaiveTime>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Time),
                Type::JSON | Type::JSONB => pg_row
                    .try_get::<_, Option<serde_json::Value>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Json),
                _ => pg_row
                    .try_get::<_, Option<String>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::String),
            })
            .collect();

        Row::new(columns, values)
    }
}

/// The `tokio-postgres` type a codec reads and writes.
const fn pg_type(codec: ColumnCodec) -> Type {
    match codec {
        ColumnCodec::Boolean => Type::BOOL,
        ColumnCodec::SmallInt => Type::INT2,
        ColumnCodec::Integer => Type::INT4,
        ColumnCodec::BigInt => Type::INT8,
        ColumnCodec::Real => Type::FLOAT4,
        ColumnCodec::Double => Type::FLOAT8,
        ColumnCodec::Text | ColumnCodec::Fallback => Type::TEXT,
        ColumnCodec::Bytes => Type::BYTEA,
        ColumnCodec::Uuid => Type::UUID,
        ColumnCodec::Date => Type::DATE,
        ColumnCodec::Time => Type::TIME,
        ColumnCodec::Timestamp => Type::TIMESTAMP,
        ColumnCodec::TimestampTz => Type::TIMESTAMPTZ,
        ColumnCodec::Json => Type::JSON,
        ColumnCodec::Jsonb => Type::JSONB,
    }
}

/// A null that passes the type check of the codec's column.
fn typed_null(codec: ColumnCodec) -> BoxedParam {
    match codec {
        ColumnCodec::Boolean => Box::new(Option::<bool>::None),
        ColumnCodec::SmallInt => Box::new(Option::<i16>::None),
        ColumnCodec::Integer => Box::new(Option::<i32>::None),
        ColumnCodec::BigInt => Box::new(Option::<i64>::None),
        ColumnCodec::Real => Box::new(Option::<f32>::None),
        ColumnCodec::Double => Box::new(Option::<f64>::None),
        ColumnCodec::Text | ColumnCodec::Fallback => Box::new(Option::<String>::None),
        ColumnCodec::Bytes => Box::new(Option::<Vec<u8>>::None),
        ColumnCodec::Uuid => Box::new(Option::<uuid::Uuid>::None),
        ColumnCodec::Date => Box::new(Option::<chrono::NaiveDate>::None),
        ColumnCodec::Time => Box::new(Option::<chrono::NaiveTime>::None),
        ColumnCodec::Timestamp => Box::new(Option::<chrono::NaiveDateTime>::None),
        ColumnCodec::TimestampTz => Box::new(Option::<chrono::DateTime<chrono::Utc>>::None),
        ColumnCodec::Json | ColumnCodec::Jsonb => Box::new(Option::<serde_json::Value>::None),
    }
}

/// Converts an encoded value to the exact Rust type the codec's column accepts.
#[allow(clippy::cast_possible_truncation)]
fn encode_param(codec: ColumnCodec, value: &Value) -> StrataResult<BoxedParam> {
    let out_of_range =
        |target: &str, i: i64| StrataError::DatabaseError(format!("{i} does not fit in {target}"));
    let param: BoxedParam = match (codec, value) {
        (_, Value::Null) => typed_null(codec),
        (ColumnCodec::Boolean, Value::Bool(b)) => Box::new(*b),
        (ColumnCodec::SmallInt, Value::Int(i)) => {
            Box::new(i16::try_from(*i).map_err(|_| out_of_range("smallint", *i))?)
        }
        (ColumnCodec::Integer, Value::Int(i)) => {
            Box::new(i32::try_from(*i).map_err(|_| out_of_range("integer", *i))?)
        }
        (ColumnCodec::BigInt, Value::Int(i)) => Box::new(*i),
        (ColumnCodec::Real, Value::Float(f)) => Box::new(*f as f32),
        (ColumnCodec::Double, Value::Float(f)) => Box::new(*f),
        (ColumnCodec::Text | ColumnCodec::Fallback, Value::String(s)) => Box::new(s.clone()),
        (ColumnCodec::Bytes, Value::Bytes(b)) => Box::new(b.clone()),
        (ColumnCodec::Uuid, Value::Uuid(u)) => Box::new(*u),
        (ColumnCodec::Date, Value::Date(d)) => Box::new(*d),
        (ColumnCodec::Time, Value::Time(t)) => Box::new(*t),
        (ColumnCodec::Timestamp, Value::DateTime(dt)) => Box::new(*dt),
        (ColumnCodec::TimestampTz, Value::DateTimeTz(dt)) => Box::new(*dt),
        (ColumnCodec::Json | ColumnCodec::Jsonb, Value::Json(j)) => Box::new(j.clone()),
        (codec, other) => {
            return Err(StrataError::DatabaseError(format!(
                "Cannot write a {} value to a {} column",
                other.kind(),
                codec.staging_type()
            )))
        }
    };
    Ok(param)
}

/// Reads one column of a binary copy row according to its codec.
fn decode_column(
    row: &BinaryCopyOutRow,
    idx: usize,
    codec: ColumnCodec,
) -> Result<Value, tokio_postgres::Error> {
    let value = match codec {
        ColumnCodec::Boolean => row.try_get::<Option<bool>>(idx)?.map_or(Value::Null, Value::Bool),
        ColumnCodec::SmallInt => row.try_get::<Option<i16>>(idx)?.map_or(Value::Null, Value::from),
        ColumnCodec::Integer => row.try_get::<Option<i32>>(idx)?.map_or(Value::Null, Value::from),
        ColumnCodec::BigInt => row.try_get::<Option<i64>>(idx)?.map_or(Value::Null, Value::Int),
        ColumnCodec::Real => row.try_get::<Option<f32>>(idx)?.map_or(Value::Null, Value::from),
        ColumnCodec::Double => row.try_get::<Option<f64>>(idx)?.map_or(Value::Null, Value::Float),
        ColumnCodec::Text | ColumnCodec::Fallback => row
            .try_get::<Option<String>>(idx)?
            .map_or(Value::Null, Value::String),
        ColumnCodec::Bytes => row
            .try_get::<Option<Vec<u8>>>(idx)?
            .map_or(Value::Null, Value::Bytes),
        ColumnCodec::Uuid => row
            .try_get::<Option<uuid::Uuid>>(idx)?
            .map_or(Value::Null, Value::Uuid),
        ColumnCodec::Date => row
            .try_get::<Option<chrono::NaiveDate>>(idx)?
            .map_or(Value::Null, Value::Date),
        ColumnCodec::Time => row
            .try_get::<Option<chrono::NaiveTime>>(idx)?
            .map_or(Value::Null, Value::Time),
        ColumnCodec::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>>(idx)?
            .map_or(Value::Null, Value::DateTime),
        ColumnCodec::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map_or(Value::Null, Value::DateTimeTz),
        ColumnCodec::Json | ColumnCodec::Jsonb => row
            .try_get::<Option<serde_json::Value>>(idx)?
            .map_or(Value::Null, Value::Json),
    };
    Ok(value)
}

fn column_list(columns: &[CopyColumn]) -> String {
    columns
        .iter()
        .map(|c| Enclosure::DoubleQuote.quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

struct PgRowSource {
    // Keeps the session checked out for the lifetime of the stream.
    _client: deadpool_postgres::Object,
    stream: Pin<Box<BinaryCopyOutStream>>,
    codecs: Vec<ColumnCodec>,
}

#[async_trait::async_trait]
impl RowSource for PgRowSource {
    async fn next_row(&mut self) -> StrataResult<Option<Vec<Value>>> {
        let Some(next) = self.stream.next().await else {
            return Ok(None);
        };
        let row = next.map_err(|e| StrataError::DatabaseError(format!("Copy out failed: {e}")))?;
        self.codecs
            .iter()
            .enumerate()
            .map(|(idx, codec)| {
                decode_column(&row, idx, *codec).map_err(|e| {
                    StrataError::DatabaseError(format!("Failed to read column {idx}: {e}"))
                })
            })
            .collect::<StrataResult<Vec<_>>>()
            .map(Some)
    }
}

struct PgRowSink {
    _client: deadpool_postgres::Object,
    writer: Pin<Box<BinaryCopyInWriter>>,
    codecs: Vec<ColumnCodec>,
}

#[async_trait::async_trait]
impl RowSink for PgRowSink {
    async fn write_row(&mut self, row: &[Value]) -> StrataResult<()> {
        if row.len() != self.codecs.len() {
            return Err(StrataError::DatabaseError(format!(
                "Copy row has {} values, expected {}",
                row.len(),
                self.codecs.len()
            )));
        }
        let params = self
            .codecs
            .iter()
            .zip(row)
            .map(|(codec, value)| encode_param(*codec, value))
            .collect::<StrataResult<Vec<_>>>()?;
        let refs = PostgresContext::param_refs(&params);
        self.writer
            .as_mut()
            .write(&refs)
            .await
            .map_err(|e| StrataError::DatabaseError(format!("Copy in failed: {e}")))
    }

    async fn finish(self: Box<Self>) -> StrataResult<u64> {
        let mut this = *self;
        this.writer
            .as_mut()
            .finish()
            .await
            .map_err(|e| StrataError::DatabaseError(format!("Copy in failed: {e}")))
    }
}

#[async_trait::async_trait]
impl DatabaseContext for PostgresContext {
    fn vendor(&self) -> &'static str {
        "postgresql"
    }

    fn enclosure(&self) -> Enclosure {
        Enclosure::DoubleQuote
    }

    fn database_name(&self) -> String {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name
            .clone()
    }

    fn admin_database(&self) -> Option<String> {
        self.config.admin_database.clone()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        tracing::debug!(target: "strata::sql", sql, "execute");
        let client = self.client().await?;
        let sql_params = Self::value_to_sql_params(params);
        client
            .execute(sql, &Self::param_refs(&sql_params))
            .await
            .map_err(|e| StrataError::DatabaseError(format!("{e}")))
    }

    async fn execute_batch(&self, sql: &str) -> StrataResult<()> {
        tracing::debug!(target: "strata::sql", sql, "execute batch");
        let client = self.client().await?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| StrataError::DatabaseError(format!("{e}")))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        tracing::debug!(target: "strata::sql", sql, "query");
        let client = self.client().await?;
        let sql_params = Self::value_to_sql_params(params);
        let rows = client
            .query(sql, &Self::param_refs(&sql_params))
            .await
            .map_err(|e| StrataError::DatabaseError(format!("{e}")))?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn begin_transaction(&self) -> StrataResult<()> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "A transaction is already open".to_string(),
            ));
        }
        if let Err(e) = self.execute_batch("BEGIN").await {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn commit(&self) -> StrataResult<()> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "No transaction to commit".to_string(),
            ));
        }
        self.execute_batch("COMMIT").await
    }

    async fn rollback(&self) -> StrataResult<()> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StrataError::TransactionError(
                "No transaction to roll back".to_string(),
            ));
        }
        self.execute_batch("ROLLBACK").await
    }

    async fn change_database(&self, database: &str) -> StrataResult<()> {
        let pool = Self::create_pool(&self.config.with_database(database))?;
        // Fail here rather than on the next statement if the database is unreachable.
        drop(
            pool.get()
                .await
                .map_err(|e| StrataError::OperationalError(format!("Pool error: {e}")))?,
        );
        let previous = std::mem::replace(
            &mut *self.active.lock().unwrap_or_else(PoisonError::into_inner),
            ActiveDatabase {
                name: database.to_string(),
                pool,
            },
        );
        previous.pool.close();
        self.in_transaction.store(false, Ordering::SeqCst);
        tracing::debug!(from = %previous.name, to = database, "changed database");
        Ok(())
    }

    async fn terminate_connections(&self, database: &str) -> StrataResult<u64> {
        let rows = self
            .query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[Value::from(database)],
            )
            .await?;
        Ok(rows.len() as u64)
    }

    async fn table_exists(&self, table: &TableName) -> StrataResult<bool> {
        let rows = self
            .query(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1::text, current_schema()) \
                 AND table_name = $2::text",
                &[
                    Value::from(table.schema.clone()),
                    Value::from(table.name.as_str()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn connect_to(&self, database: &str) -> StrataResult<Box<dyn DatabaseContext>> {
        let context = Self::from_config(self.config.with_database(database))?;
        Ok(Box::new(context))
    }

    async fn copy_out(
        &self,
        query: &str,
        columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSource>> {
        let sql = format!("COPY ({query}) TO STDOUT (FORMAT binary)");
        tracing::debug!(target: "strata::sql", sql = %sql, "copy out");
        let client = self.client().await?;
        let stream = client
            .copy_out(sql.as_str())
            .await
            .map_err(|e| StrataError::DatabaseError(format!("{e}")))?;
        let codecs: Vec<ColumnCodec> = columns.iter().map(|c| c.codec).collect();
        let types: Vec<Type> = codecs.iter().map(|c| pg_type(*c)).collect();
        Ok(Box::new(PgRowSource {
            _client: client,
            stream: Box::pin(BinaryCopyOutStream::new(stream, &types)),
            codecs,
        }))
    }

    async fn copy_in(
        &self,
        table: &TableName,
        columns: &[CopyColumn],
    ) -> StrataResult<Box<dyn RowSink>> {
        let sql = format!(
            "COPY {} ({}) FROM STDIN (FORMAT binary)",
            Enclosure::DoubleQuote.quote_table(table),
            column_list(columns)
        );
        tracing::debug!(target: "strata::sql", sql = %sql, "copy in");
        let client = self.client().await?;
        let sink = client
            .copy_in::<_, Bytes>(sql.as_str())
            .await
            .map_err(|e| StrataError::DatabaseError(format!("{e}")))?;
        let codecs: Vec<ColumnCodec> = columns.iter().map(|c| c.codec).collect();
        let types: Vec<Type> = codecs.iter().map(|c| pg_type(*c)).collect();
        Ok(Box::new(PgRowSink {
            _client: client,
            writer: Box::pin(BinaryCopyInWriter::new(sink, &types)),
            codecs,
        }))
    }
}
