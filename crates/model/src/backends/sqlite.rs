//! SQLite Adapter Implementation
//!
//! [`DatabaseAdapter`] over a sqlx SQLite pool. In-memory databases are kept
//! on a single connection that is never recycled, so every statement sees
//! the same database.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use service_builder::builder;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::core::*;
use crate::dialect::{format_datetime, SqlDialect};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Connection settings for [`SqliteAdapter`]
#[derive(Debug, Clone)]
#[builder]
pub struct SqliteAdapterConfig {
    /// `sqlite::memory:`, `sqlite://path.db`, ...
    #[builder(getter)]
    pub url: String,

    /// Pool size for file databases; in-memory databases always use one
    #[builder(default = "5", getter)]
    pub max_connections: u32,
}

impl SqliteAdapterConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
        }
    }

    /// Private in-memory database
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// SQLite adapter backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: SqlitePool,
}

impl SqliteAdapter {
    pub async fn connect(config: SqliteAdapterConfig) -> AdapterResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(map_sqlx_error)?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(config.max_connections.max(1));
        }

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            AdapterError::new(
                AdapterErrorKind::Connection,
                format!("Failed to open SQLite database '{}': {}", config.url, e),
            )
            .with_source(e)
        })?;
        info!("Connected to SQLite database {}", config.url);
        Ok(Self { pool })
    }

    /// Shorthand for a private in-memory database
    pub async fn in_memory() -> AdapterResult<Self> {
        Self::connect(SqliteAdapterConfig::in_memory()).await
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>> {
        let rows = bind_all(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        decode_rows(&rows)
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult> {
        if has_returning(sql) {
            let rows = self.query(sql, params).await?;
            return Ok(returned(rows));
        }
        let result = bind_all(sql, params)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(executed(sql, &result))
    }

    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        debug!("SQLite transaction started");
        Ok(Arc::new(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
            finished: AtomicBool::new(false),
        }))
    }
}

/// An open SQLite transaction
pub struct SqliteTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Sqlite>>>,
    finished: AtomicBool,
}

fn finished_error() -> AdapterError {
    AdapterError::new(
        AdapterErrorKind::Transaction,
        "Transaction already committed or rolled back",
    )
}

#[async_trait]
impl DatabaseAdapter for SqliteTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished_error)?;
        let rows = bind_all(sql, params)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        decode_rows(&rows)
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult> {
        if has_returning(sql) {
            let rows = self.query(sql, params).await?;
            return Ok(returned(rows));
        }
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished_error)?;
        let result = bind_all(sql, params)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(executed(sql, &result))
    }

    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>> {
        Err(AdapterError::new(
            AdapterErrorKind::Unsupported,
            "Nested transactions are not supported; use savepoints",
        ))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn commit(&self) -> AdapterResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished_error)?;
        self.finished.store(true, Ordering::SeqCst);
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(&self) -> AdapterResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished_error)?;
        self.finished.store(true, Ordering::SeqCst);
        tx.rollback().await.map_err(map_sqlx_error)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn as_adapter(self: Arc<Self>) -> Arc<dyn DatabaseAdapter> {
        self
    }
}

fn has_returning(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains(" RETURNING ")
}

fn returned(rows: Vec<DatabaseRow>) -> ExecuteResult {
    ExecuteResult {
        affected_rows: Some(rows.len() as u64),
        insert_id: None,
        rows,
    }
}

fn executed(sql: &str, result: &SqliteQueryResult) -> ExecuteResult {
    let is_insert = sql.trim_start().to_ascii_uppercase().starts_with("INSERT");
    let rowid = result.last_insert_rowid();
    ExecuteResult {
        affected_rows: Some(result.rows_affected()),
        insert_id: (is_insert && rowid != 0).then_some(DatabaseValue::Int64(rowid)),
        rows: Vec::new(),
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::DateTime(dt) => query.bind(format_datetime(dt)),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

fn bind_all<'q>(sql: &'q str, params: &[DatabaseValue]) -> SqliteQuery<'q> {
    params.iter().fold(sqlx::query(sql), bind_value)
}

fn decode_rows(rows: &[SqliteRow]) -> AdapterResult<Vec<DatabaseRow>> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &SqliteRow) -> AdapterResult<DatabaseRow> {
    let mut decoded = DatabaseRow::new();
    for column in row.columns() {
        decoded.push(column.name(), decode_value(row, column.ordinal())?);
    }
    Ok(decoded)
}

/// Convert a SQLite value by its storage class
fn decode_value(row: &SqliteRow, index: usize) -> AdapterResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(map_sqlx_error)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => DatabaseValue::Int64(row.try_get_unchecked::<i64, _>(index).map_err(map_sqlx_error)?),
        "REAL" | "NUMERIC" => DatabaseValue::Float64(row.try_get_unchecked::<f64, _>(index).map_err(map_sqlx_error)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index).map_err(map_sqlx_error)?),
        _ => DatabaseValue::String(row.try_get_unchecked::<String, _>(index).map_err(map_sqlx_error)?),
    };
    Ok(value)
}

/// Classify a sqlx error, keeping it as the source
fn map_sqlx_error(error: sqlx::Error) -> AdapterError {
    let (kind, code) = match &error {
        sqlx::Error::Database(db) => {
            let kind = match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => AdapterErrorKind::Constraint,
                _ => AdapterErrorKind::Query,
            };
            (kind, db.code().map(|c| c.into_owned()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Configuration(_) => {
            (AdapterErrorKind::Connection, None)
        }
        _ => (AdapterErrorKind::Query, None),
    };

    let mut adapter_error = AdapterError::new(kind, error.to_string());
    if let Some(code) = code {
        adapter_error = adapter_error.with_code(code);
    }
    adapter_error.with_source(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().await.unwrap();
        adapter
            .execute(
                "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE, price REAL, data BLOB)",
                &[],
            )
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_insert_reports_rowid_and_decodes() {
        let adapter = adapter().await;
        let result = adapter
            .execute(
                "INSERT INTO items (name, price, data) VALUES (?, ?, ?)",
                &["pen".into(), 1.5.into(), DatabaseValue::Bytes(vec![1, 2])],
            )
            .await
            .unwrap();
        assert_eq!(result.affected_rows, Some(1));
        assert_eq!(result.insert_id, Some(DatabaseValue::Int64(1)));

        let rows = adapter.query("SELECT * FROM items", &[]).await.unwrap();
        assert_eq!(rows[0].get("name"), Some(&DatabaseValue::String("pen".into())));
        assert_eq!(rows[0].get("price"), Some(&DatabaseValue::Float64(1.5)));
        assert_eq!(rows[0].get("data"), Some(&DatabaseValue::Bytes(vec![1, 2])));
    }

    #[tokio::test]
    async fn test_returning_through_execute() {
        let adapter = adapter().await;
        let result = adapter
            .execute("INSERT INTO items (name) VALUES (?) RETURNING *", &["cup".into()])
            .await
            .unwrap();
        assert_eq!(result.affected_or_rows(), 1);
        assert_eq!(result.rows[0].get("price"), Some(&DatabaseValue::Null));
    }

    #[tokio::test]
    async fn test_unique_violation_is_a_constraint_error() {
        let adapter = adapter().await;
        adapter.execute("INSERT INTO items (name) VALUES ('a')", &[]).await.unwrap();
        let err = adapter
            .execute("INSERT INTO items (name) VALUES ('a')", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Constraint);
        assert!(err.native::<sqlx::Error>().is_some());

        let err = adapter.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Query);
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let adapter = adapter().await;
        let tx = adapter.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO items (name) VALUES ('tmp')", &[]).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(tx.is_finished());
        assert!(tx.execute("SELECT 1", &[]).await.is_err());

        let rows = adapter.query("SELECT COUNT(*) AS count FROM items", &[]).await.unwrap();
        assert_eq!(rows[0].get("count"), Some(&DatabaseValue::Int64(0)));
    }
}
