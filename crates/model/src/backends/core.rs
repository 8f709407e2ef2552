//! Core Database Adapter Traits
//!
//! The engine never opens or pools connections itself. Everything it needs
//! from a store goes through [`DatabaseAdapter`]: run a query, execute a
//! statement, open a transaction, and report which SQL dialect it speaks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::dialect::SqlDialect;

/// Result type alias for adapter calls
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Broad classification of adapter failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    Connection,
    Query,
    Constraint,
    Transaction,
    Unsupported,
}

/// Failure reported by a database adapter.
///
/// The driver's own error is kept as the `source` so callers can downcast to
/// the native type (for example `sqlx::Error`).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
    /// Driver specific error code (SQLSTATE, SQLite extended code, ...)
    pub code: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Downcast the native driver error.
    pub fn native<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_ref().and_then(|s| s.downcast_ref::<E>())
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::DateTime(dt) => {
                JsonValue::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            }
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create a DatabaseValue from a JSON value without any schema knowledge.
    ///
    /// Arrays and objects become [`DatabaseValue::Json`]; adapters decide how
    /// to store them.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::String(n.to_string())
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            other => DatabaseValue::Json(other),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// One result row, columns kept in the order the driver returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: DatabaseValue) {
        self.columns.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(name, value.into());
        self
    }

    /// Get a column value by name
    pub fn get(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Value of the first column, used for scalar queries
    pub fn first(&self) -> Option<&DatabaseValue> {
        self.columns.first().map(|(_, v)| v)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_columns(self) -> Vec<(String, DatabaseValue)> {
        self.columns
    }
}

/// Outcome of a statement executed through [`DatabaseAdapter::execute`].
///
/// Drivers fill in whatever they know; any of the fields may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub affected_rows: Option<u64>,
    pub insert_id: Option<DatabaseValue>,
    pub rows: Vec<DatabaseRow>,
}

impl ExecuteResult {
    pub fn affected(count: u64) -> Self {
        Self {
            affected_rows: Some(count),
            ..Default::default()
        }
    }

    /// Affected row count, falling back to the number of returned rows
    pub fn affected_or_rows(&self) -> u64 {
        self.affected_rows.unwrap_or(self.rows.len() as u64)
    }
}

/// Contract every store driver implements
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// SQL dialect spoken by this adapter
    fn dialect(&self) -> SqlDialect;

    /// Execute a query and return the result rows
    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>>;

    /// Execute a statement
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>>;
}

/// An open transaction. Statements issued through its [`DatabaseAdapter`]
/// methods run inside it.
#[async_trait]
pub trait DatabaseTransaction: DatabaseAdapter {
    /// Commit the transaction
    async fn commit(&self) -> AdapterResult<()>;

    /// Rollback the transaction
    async fn rollback(&self) -> AdapterResult<()>;

    /// Whether commit or rollback already ran
    fn is_finished(&self) -> bool;

    /// View this transaction as a plain adapter, e.g. to bind a model to it
    fn as_adapter(self: Arc<Self>) -> Arc<dyn DatabaseAdapter>;
}
