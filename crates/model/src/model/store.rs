//! Store lookups behind the database-backed validation rules

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::Model;
use crate::conditions::{CompileContext, Condition, FieldPredicate};
use crate::error::ModelResult;
use crate::query::sql;
use crate::query::QueryState;
use crate::schema::{from_db, FieldType};
use crate::soft_delete::TrashFilter;
use crate::validation::ValidationStore;

/// Key column assumed for tables other than the model's own
const FOREIGN_KEY_COLUMN: &str = "id";

impl Model {
    fn is_own_table(&self, table: Option<&str>) -> bool {
        table.map_or(true, |t| t == self.table())
    }

    /// Compile context for `table`; foreign tables get no schema and no
    /// soft-delete filter
    fn context_for(&self, own: bool) -> CompileContext<'_> {
        if own {
            self.compile_context()
        } else {
            CompileContext::new(self.dialect(), FOREIGN_KEY_COLUMN)
        }
    }
}

#[async_trait]
impl ValidationStore for Model {
    async fn exists_in_model(&self, condition: Condition, exclude_key: Option<Value>) -> ModelResult<bool> {
        let mut condition = condition;
        if let Some(key) = exclude_key.filter(|k| !k.is_null()) {
            condition.insert(self.primary_key(), FieldPredicate::Ne(key));
        }
        let statement = sql::exists(&self.compile_context(), self.table(), &condition, TrashFilter::LiveOnly)?;
        Ok(!self.run_query(statement).await?.is_empty())
    }

    async fn exists_in_table(&self, table: Option<&str>, column: &str, value: &Value) -> ModelResult<bool> {
        let own = self.is_own_table(table);
        let target = table.unwrap_or(self.table());
        let condition = Condition::new().eq(column, value.clone());
        let statement = sql::exists(&self.context_for(own), target, &condition, TrashFilter::LiveOnly)?;
        debug!("{}: existence check on {}.{}", self.name(), target, column);
        Ok(!self.adapter().query(&statement.sql, &statement.params).await?.is_empty())
    }

    async fn lookup_field(
        &self,
        table: Option<&str>,
        key_column: Option<&str>,
        key: &Value,
        field: &str,
    ) -> ModelResult<Option<Value>> {
        let own = self.is_own_table(table);
        let target = table.unwrap_or(self.table());
        let key_column = key_column.unwrap_or(if own { self.primary_key() } else { FOREIGN_KEY_COLUMN });

        let mut state = QueryState::with_condition(Condition::new().eq(key_column, key.clone()));
        state.fields = vec![field.to_string()];
        state.limit = Some(1);
        let statement = sql::select(&self.context_for(own), target, &state)?;

        if own {
            let mut rows = self.run_query(statement).await?;
            return Ok(rows.first_mut().and_then(|row| row.remove(field)));
        }
        let rows = self.adapter().query(&statement.sql, &statement.params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get(field).cloned())
            .map(|v| from_db(FieldType::Any, v)))
    }

    fn as_model(&self) -> Option<Model> {
        Some(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::backends::DatabaseRow;
    use crate::dialect::SqlDialect;
    use crate::model::{ModelConfig, ModelDefinition};
    use crate::schema::FieldDefinition;
    use crate::test_support::MockAdapter;

    fn model(adapter: &MockAdapter) -> Model {
        let definition = ModelDefinition::builder("User")
            .config(ModelConfig::new("users").soft_delete(true))
            .field("email", FieldDefinition::new(FieldType::String))
            .field("active", FieldDefinition::new(FieldType::Boolean))
            .build()
            .unwrap();
        Model::new(definition, Arc::new(adapter.clone()))
    }

    #[tokio::test]
    async fn test_uniqueness_lookup_excludes_current_row() {
        let adapter = MockAdapter::new(SqlDialect::PostgreSQL);
        adapter.push_rows(vec![DatabaseRow::new().with("found", 1i64)]);

        let taken = model(&adapter)
            .exists_in_model(Condition::new().eq("email", "a@x.com"), Some(json!(3)))
            .await
            .unwrap();
        assert!(taken);
        assert_eq!(
            adapter.statements(),
            vec!["SELECT 1 AS found FROM \"users\" WHERE \"email\" = $1 AND \"id\" != $2 AND \"deletedAt\" IS NULL LIMIT 1"]
        );
    }

    #[tokio::test]
    async fn test_foreign_tables_skip_soft_delete() {
        let adapter = MockAdapter::new(SqlDialect::SQLite);
        let users = model(&adapter);

        assert!(!users.exists_in_table(Some("roles"), "name", &json!("admin")).await.unwrap());
        assert_eq!(adapter.statements()[0], "SELECT 1 AS found FROM roles WHERE name = ? LIMIT 1");
    }

    #[tokio::test]
    async fn test_lookup_field_decodes_own_columns() {
        let adapter = MockAdapter::new(SqlDialect::SQLite);
        adapter.push_rows(vec![DatabaseRow::new().with("active", 1i64)]);

        let value = model(&adapter).lookup_field(None, None, &json!(7), "active").await.unwrap();
        assert_eq!(value, Some(json!(true)));
        assert_eq!(
            adapter.statements()[0],
            "SELECT active FROM users WHERE id = ? AND deletedAt IS NULL LIMIT 1"
        );
    }
}
