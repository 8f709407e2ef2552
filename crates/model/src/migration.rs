//! Migrations
//!
//! A [`Migration`] issues its own DDL through an adapter. [`MigrationRunner`]
//! applies registered migrations in order, records them in a tracking table
//! and can revert the most recent one.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::backends::{DatabaseAdapter, DatabaseTransaction, DatabaseValue};
use crate::dialect::{format_datetime, BindParams, SqlDialect};
use crate::error::{ModelError, ModelResult};
use crate::security::quote;

/// A reversible schema change
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique name, recorded once applied
    fn name(&self) -> &str;

    async fn up(&self, adapter: &dyn DatabaseAdapter) -> ModelResult<()>;

    async fn down(&self, adapter: &dyn DatabaseAdapter) -> ModelResult<()>;
}

/// Migration made of plain SQL statements
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    up: Vec<String>,
    down: Vec<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn up_sql(mut self, sql: impl Into<String>) -> Self {
        self.up.push(sql.into());
        self
    }

    pub fn down_sql(mut self, sql: impl Into<String>) -> Self {
        self.down.push(sql.into());
        self
    }
}

async fn run_statements(adapter: &dyn DatabaseAdapter, statements: &[String]) -> ModelResult<()> {
    for sql in statements {
        adapter.execute(sql, &[]).await?;
    }
    Ok(())
}

#[async_trait]
impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, adapter: &dyn DatabaseAdapter) -> ModelResult<()> {
        run_statements(adapter, &self.up).await
    }

    async fn down(&self, adapter: &dyn DatabaseAdapter) -> ModelResult<()> {
        run_statements(adapter, &self.down).await
    }
}

/// Index declared on a model, rendered by migrations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// `CREATE [UNIQUE] INDEX` statement for `table`
    pub fn create_sql(&self, dialect: SqlDialect, table: &str) -> ModelResult<String> {
        if self.fields.is_empty() {
            return Err(ModelError::Migration(format!("Index '{}' has no fields", self.name)));
        }
        let columns = self
            .fields
            .iter()
            .map(|f| quote(dialect, f))
            .collect::<ModelResult<Vec<_>>>()?;
        let if_not_exists = match dialect {
            SqlDialect::MySQL => "",
            SqlDialect::PostgreSQL | SqlDialect::SQLite => "IF NOT EXISTS ",
        };
        Ok(format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            if_not_exists,
            quote(dialect, &self.name)?,
            quote(dialect, table)?,
            columns.join(", ")
        ))
    }

    pub fn drop_sql(&self, dialect: SqlDialect, table: &str) -> ModelResult<String> {
        Ok(match dialect {
            SqlDialect::MySQL => format!("DROP INDEX {} ON {}", quote(dialect, &self.name)?, quote(dialect, table)?),
            SqlDialect::PostgreSQL | SqlDialect::SQLite => {
                format!("DROP INDEX IF EXISTS {}", quote(dialect, &self.name)?)
            }
        })
    }
}

/// An applied migration as recorded in the tracking table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub name: String,
    pub batch: i64,
    pub applied_at: String,
}

/// Applied state of a registered migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub name: String,
    pub applied: bool,
    pub batch: Option<i64>,
}

/// Result of [`MigrationRunner::run`]
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    pub applied: Vec<String>,
    pub skipped: usize,
    pub execution_time_ms: u128,
}

/// Applies registered migrations and tracks them in `_migrations`
pub struct MigrationRunner {
    adapter: Arc<dyn DatabaseAdapter>,
    migrations: Vec<Arc<dyn Migration>>,
    table: String,
}

impl MigrationRunner {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            adapter,
            migrations: Vec::new(),
            table: "_migrations".to_string(),
        }
    }

    /// Register a migration; registration order is application order
    pub fn add(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    pub fn tracking_table(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> SqlDialect {
        self.adapter.dialect()
    }

    async fn ensure_table(&self) -> ModelResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (name VARCHAR(255) PRIMARY KEY, batch INTEGER NOT NULL, applied_at VARCHAR(32) NOT NULL)",
            quote(self.dialect(), &self.table)?
        );
        self.adapter.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Applied migrations, oldest batch first
    pub async fn applied(&self) -> ModelResult<Vec<MigrationRecord>> {
        self.ensure_table().await?;
        let sql = format!(
            "SELECT name, batch, applied_at FROM {} ORDER BY batch ASC",
            quote(self.dialect(), &self.table)?
        );
        let rows = self.adapter.query(&sql, &[]).await?;
        Ok(rows
            .into_iter()
            .map(|row| MigrationRecord {
                name: text(row.get("name")),
                batch: row.get("batch").and_then(DatabaseValue::as_i64).unwrap_or_default(),
                applied_at: text(row.get("applied_at")),
            })
            .collect())
    }

    /// Apply every pending migration in one new batch
    pub async fn run(&self) -> ModelResult<MigrationRunResult> {
        let started = Instant::now();
        let applied = self.applied().await?;
        let batch = applied.iter().map(|r| r.batch).max().unwrap_or(0) + 1;

        let mut result = MigrationRunResult::default();
        for migration in &self.migrations {
            if applied.iter().any(|r| r.name == migration.name()) {
                result.skipped += 1;
                continue;
            }

            info!("Applying migration: {}", migration.name());
            let tx = self.adapter.begin_transaction().await?;
            let outcome = self.apply(migration.as_ref(), tx.clone(), batch).await;
            finish(tx, outcome.is_ok()).await?;
            outcome.map_err(|e| ModelError::Migration(format!("Migration '{}' failed: {}", migration.name(), e)))?;
            result.applied.push(migration.name().to_string());
        }

        result.execution_time_ms = started.elapsed().as_millis();
        info!(
            "Migrations complete: {} applied, {} skipped",
            result.applied.len(),
            result.skipped
        );
        Ok(result)
    }

    async fn apply(&self, migration: &dyn Migration, tx: Arc<dyn DatabaseTransaction>, batch: i64) -> ModelResult<()> {
        let dialect = tx.dialect();
        let adapter = tx.as_adapter();
        migration.up(adapter.as_ref()).await?;

        let mut params = BindParams::new(dialect);
        let placeholders = [
            params.push(DatabaseValue::String(migration.name().to_string())),
            params.push(DatabaseValue::Int64(batch)),
            params.push(DatabaseValue::String(format_datetime(&Utc::now()))),
        ];
        let sql = format!(
            "INSERT INTO {} (name, batch, applied_at) VALUES ({})",
            quote(dialect, &self.table)?,
            placeholders.join(", ")
        );
        adapter.execute(&sql, &params.into_values()).await?;
        Ok(())
    }

    /// Revert the most recently applied migration, returning its name
    pub async fn rollback_last(&self) -> ModelResult<Option<String>> {
        let applied = self.applied().await?;
        let Some(last_batch) = applied.iter().map(|r| r.batch).max() else {
            return Ok(None);
        };

        let Some(migration) = self
            .migrations
            .iter()
            .rev()
            .find(|m| applied.iter().any(|r| r.batch == last_batch && r.name == m.name()))
        else {
            return Err(ModelError::Migration(format!(
                "No registered migration matches batch {}",
                last_batch
            )));
        };

        info!("Rolling back migration: {}", migration.name());
        let tx = self.adapter.begin_transaction().await?;
        let outcome = self.revert(migration.as_ref(), tx.clone()).await;
        finish(tx, outcome.is_ok()).await?;
        outcome.map_err(|e| ModelError::Migration(format!("Rollback of '{}' failed: {}", migration.name(), e)))?;
        Ok(Some(migration.name().to_string()))
    }

    async fn revert(&self, migration: &dyn Migration, tx: Arc<dyn DatabaseTransaction>) -> ModelResult<()> {
        let dialect = tx.dialect();
        let adapter = tx.as_adapter();
        migration.down(adapter.as_ref()).await?;

        let mut params = BindParams::new(dialect);
        let placeholder = params.push(DatabaseValue::String(migration.name().to_string()));
        let sql = format!("DELETE FROM {} WHERE name = {}", quote(dialect, &self.table)?, placeholder);
        adapter.execute(&sql, &params.into_values()).await?;
        Ok(())
    }

    /// Applied state of every registered migration
    pub async fn status(&self) -> ModelResult<Vec<MigrationStatus>> {
        let applied = self.applied().await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| {
                let record = applied.iter().find(|r| r.name == m.name());
                MigrationStatus {
                    name: m.name().to_string(),
                    applied: record.is_some(),
                    batch: record.map(|r| r.batch),
                }
            })
            .collect())
    }
}

async fn finish(tx: Arc<dyn DatabaseTransaction>, success: bool) -> ModelResult<()> {
    if success {
        tx.commit().await?;
    } else if let Err(e) = tx.rollback().await {
        warn!("Failed to roll back migration transaction: {}", e);
    }
    Ok(())
}

fn text(value: Option<&DatabaseValue>) -> String {
    match value {
        Some(DatabaseValue::String(s)) => s.clone(),
        Some(other) => other.to_json().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_sql_per_dialect() {
        let index = IndexDefinition::new("users_email_unique", ["email"]).unique();
        assert_eq!(
            index.create_sql(SqlDialect::PostgreSQL, "users").unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"users_email_unique\" ON \"users\" (\"email\")"
        );
        assert_eq!(
            index.create_sql(SqlDialect::MySQL, "users").unwrap(),
            "CREATE UNIQUE INDEX `users_email_unique` ON `users` (`email`)"
        );
        assert_eq!(
            IndexDefinition::new("by_name_age", ["name", "age"])
                .create_sql(SqlDialect::SQLite, "people")
                .unwrap(),
            "CREATE INDEX IF NOT EXISTS by_name_age ON people (name, age)"
        );
        assert_eq!(
            index.drop_sql(SqlDialect::MySQL, "users").unwrap(),
            "DROP INDEX `users_email_unique` ON `users`"
        );
    }

    #[test]
    fn test_index_requires_fields() {
        let empty = IndexDefinition::new("empty", Vec::<String>::new());
        assert!(matches!(
            empty.create_sql(SqlDialect::SQLite, "t"),
            Err(ModelError::Migration(_))
        ));
    }
}
