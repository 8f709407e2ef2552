//! Transaction Management
//!
//! [`transaction`] scopes a closure to one database transaction: commit on
//! `Ok`, rollback on `Err`. [`SavepointManager`] adds named partial
//! rollbacks inside an open transaction.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::backends::{DatabaseAdapter, DatabaseTransaction};
use crate::error::{ModelError, ModelResult};

/// Run `f` inside a new transaction of `adapter`
pub async fn transaction<T, F>(adapter: &dyn DatabaseAdapter, f: F) -> ModelResult<T>
where
    F: FnOnce(Arc<dyn DatabaseTransaction>) -> BoxFuture<'static, ModelResult<T>>,
{
    let tx = adapter.begin_transaction().await?;
    debug!("Transaction started");

    match f(tx.clone()).await {
        Ok(value) => {
            if tx.is_finished() {
                return Err(ModelError::Transaction(
                    "Transaction was finished inside the closure".to_string(),
                ));
            }
            tx.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if !tx.is_finished() {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back transaction: {}", rollback_err);
                }
            }
            debug!("Transaction rolled back: {}", err);
            Err(err)
        }
    }
}

/// Savepoint manager for nested partial rollbacks
pub struct SavepointManager {
    tx: Arc<dyn DatabaseTransaction>,
    savepoint_count: u32,
    active: Vec<String>,
}

impl SavepointManager {
    pub fn new(tx: Arc<dyn DatabaseTransaction>) -> Self {
        Self {
            tx,
            savepoint_count: 0,
            active: Vec::new(),
        }
    }

    fn ensure_open(&self) -> ModelResult<()> {
        if self.tx.is_finished() {
            return Err(ModelError::Transaction(
                "Transaction already committed or rolled back".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_known(&self, savepoint_name: &str) -> ModelResult<usize> {
        self.active
            .iter()
            .position(|name| name == savepoint_name)
            .ok_or_else(|| ModelError::Transaction(format!("Unknown savepoint '{}'", savepoint_name)))
    }

    /// Create a new savepoint
    pub async fn create_savepoint(&mut self) -> ModelResult<String> {
        self.ensure_open()?;
        self.savepoint_count += 1;
        let savepoint_name = format!("sp_{}", self.savepoint_count);

        let sql = format!("SAVEPOINT {}", savepoint_name);
        self.tx
            .execute(&sql, &[])
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to create savepoint: {}", e)))?;

        self.active.push(savepoint_name.clone());
        Ok(savepoint_name)
    }

    /// Release a savepoint and every savepoint created after it
    pub async fn release_savepoint(&mut self, savepoint_name: &str) -> ModelResult<()> {
        self.ensure_open()?;
        let position = self.ensure_known(savepoint_name)?;

        let sql = format!("RELEASE SAVEPOINT {}", savepoint_name);
        self.tx
            .execute(&sql, &[])
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to release savepoint: {}", e)))?;

        self.active.truncate(position);
        Ok(())
    }

    /// Roll back to a savepoint; it stays usable, later ones are discarded
    pub async fn rollback_to_savepoint(&mut self, savepoint_name: &str) -> ModelResult<()> {
        self.ensure_open()?;
        let position = self.ensure_known(savepoint_name)?;

        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_name);
        self.tx.execute(&sql, &[]).await.map_err(|e| {
            ModelError::Transaction(format!("Failed to rollback to savepoint: {}", e))
        })?;

        self.active.truncate(position + 1);
        Ok(())
    }

    /// Number of savepoints created so far
    pub fn savepoint_count(&self) -> u32 {
        self.savepoint_count
    }

    /// Savepoints not yet released, oldest first
    pub fn active_savepoints(&self) -> &[String] {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlDialect;
    use crate::test_support::MockAdapter;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_commit_on_ok() {
        let adapter = MockAdapter::new(SqlDialect::SQLite);
        let value = transaction(&adapter, |tx| {
            async move {
                tx.execute("UPDATE t SET a = 1", &[]).await?;
                Ok(42)
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(adapter.statements(), vec!["BEGIN", "UPDATE t SET a = 1", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_rollback_on_err() {
        let adapter = MockAdapter::new(SqlDialect::SQLite);
        let result: ModelResult<()> = transaction(&adapter, |_tx| {
            async move { Err(ModelError::Hook("stop".into())) }.boxed()
        })
        .await;

        assert!(matches!(result, Err(ModelError::Hook(_))));
        assert_eq!(adapter.statements(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_savepoints() {
        let adapter = MockAdapter::new(SqlDialect::PostgreSQL);
        let tx = adapter.begin_transaction().await.unwrap();
        let mut savepoints = SavepointManager::new(tx.clone());

        let first = savepoints.create_savepoint().await.unwrap();
        let second = savepoints.create_savepoint().await.unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("sp_1", "sp_2"));

        savepoints.rollback_to_savepoint(&first).await.unwrap();
        assert_eq!(savepoints.active_savepoints(), &["sp_1".to_string()]);
        assert!(savepoints.release_savepoint(&second).await.is_err());
        savepoints.release_savepoint(&first).await.unwrap();

        tx.commit().await.unwrap();
        let err = savepoints.create_savepoint().await.unwrap_err();
        assert!(matches!(err, ModelError::Transaction(_)));
        assert_eq!(savepoints.savepoint_count(), 2);
        assert_eq!(
            adapter.statements(),
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "SAVEPOINT sp_2",
                "ROLLBACK TO SAVEPOINT sp_1",
                "RELEASE SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }
}
