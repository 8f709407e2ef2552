//! Recording adapter for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backends::{
    AdapterError, AdapterErrorKind, AdapterResult, DatabaseAdapter, DatabaseRow, DatabaseTransaction, DatabaseValue,
    ExecuteResult,
};
use crate::dialect::SqlDialect;

#[derive(Default)]
struct Script {
    log: Vec<(String, Vec<DatabaseValue>)>,
    queries: VecDeque<AdapterResult<Vec<DatabaseRow>>>,
    executes: VecDeque<AdapterResult<ExecuteResult>>,
}

/// Adapter that records every statement and replays scripted responses.
///
/// Unscripted queries return no rows; unscripted statements report nothing.
#[derive(Clone)]
pub(crate) struct MockAdapter {
    dialect: SqlDialect,
    script: Arc<Mutex<Script>>,
}

impl MockAdapter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn push_rows(&self, rows: Vec<DatabaseRow>) -> &Self {
        self.script.lock().queries.push_back(Ok(rows));
        self
    }

    pub fn push_query_error(&self, kind: AdapterErrorKind, message: &str) -> &Self {
        self.script.lock().queries.push_back(Err(AdapterError::new(kind, message)));
        self
    }

    pub fn push_execute(&self, result: ExecuteResult) -> &Self {
        self.script.lock().executes.push_back(Ok(result));
        self
    }

    pub fn push_execute_error(&self, kind: AdapterErrorKind, message: &str) -> &Self {
        self.script.lock().executes.push_back(Err(AdapterError::new(kind, message)));
        self
    }

    /// Every SQL string seen so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.script.lock().log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params(&self, index: usize) -> Vec<DatabaseValue> {
        self.script
            .lock()
            .log
            .get(index)
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }

    fn record(&self, sql: &str, params: &[DatabaseValue]) {
        self.script.lock().log.push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>> {
        self.record(sql, params);
        self.script.lock().queries.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult> {
        self.record(sql, params);
        self.script
            .lock()
            .executes
            .pop_front()
            .unwrap_or_else(|| Ok(ExecuteResult::default()))
    }

    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>> {
        self.record("BEGIN", &[]);
        Ok(Arc::new(MockTransaction {
            adapter: self.clone(),
            finished: AtomicBool::new(false),
        }))
    }
}

/// Transaction sharing the parent's script and log
pub(crate) struct MockTransaction {
    adapter: MockAdapter,
    finished: AtomicBool,
}

#[async_trait]
impl DatabaseAdapter for MockTransaction {
    fn dialect(&self) -> SqlDialect {
        self.adapter.dialect
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>> {
        self.adapter.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult> {
        self.adapter.execute(sql, params).await
    }

    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>> {
        Err(AdapterError::new(
            AdapterErrorKind::Unsupported,
            "Nested transactions need savepoints",
        ))
    }
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    async fn commit(&self) -> AdapterResult<()> {
        self.adapter.record("COMMIT", &[]);
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> AdapterResult<()> {
        self.adapter.record("ROLLBACK", &[]);
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn as_adapter(self: Arc<Self>) -> Arc<dyn DatabaseAdapter> {
        self
    }
}
