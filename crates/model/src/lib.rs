//! # elif-model: Declarative Relational Models
//!
//! A model is described once (table, fields, validation, hooks, scopes) and
//! bound to a [`DatabaseAdapter`]. Operations compile JSON-style conditions
//! into parameterized SQL for PostgreSQL, MySQL or SQLite, run the lifecycle
//! hooks around writes, honor soft delete, and serve reads through an
//! optional tag-invalidated cache.
//!
//! ```no_run
//! use std::sync::Arc;
//! use elif_model::{FieldDefinition, FieldType, Model, ModelDefinition, SqliteAdapter};
//! use serde_json::json;
//!
//! # async fn demo() -> elif_model::ModelResult<()> {
//! let adapter = Arc::new(SqliteAdapter::in_memory().await?);
//! let users = Model::new(
//!     ModelDefinition::builder("User")
//!         .table("users")
//!         .field("email", FieldDefinition::new(FieldType::String).not_null())
//!         .build()?,
//!     adapter,
//! );
//! let active = users.find_all(json!({ "email": { "$like": "%@example.com" } })).await?;
//! # let _ = active;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cache;
pub mod conditions;
pub mod dialect;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod schema;
pub mod security;
pub mod soft_delete;
pub mod transaction;
pub mod validation;

#[cfg(test)]
mod test_support;

// Re-export core traits and types
pub use backends::{
    AdapterError, AdapterErrorKind, AdapterResult, DatabaseAdapter, DatabaseRow, DatabaseTransaction, DatabaseValue,
    ExecuteResult, SqliteAdapter, SqliteAdapterConfig,
};
pub use cache::{CacheAdapter, CacheError, MemoryCache, MemoryCacheConfig};
pub use conditions::{Condition, FieldPredicate, IntoCondition, SortDirection, SortSpec};
pub use dialect::SqlDialect;
pub use error::{ModelError, ModelResult, ValidationError};
pub use migration::{IndexDefinition, Migration, MigrationRunner, SqlMigration};
pub use model::{
    HookContext, HookOperation, HookStage, Instance, Model, ModelConfig, ModelDefinition, ModelHooks, ModelRegistry,
    MutationOutcome, Timestamps, WriteOptions,
};
pub use query::{ChainQuery, Page, PlainQuery};
pub use schema::{DefaultValue, FieldDefinition, FieldType, Record, Schema};
pub use soft_delete::{DeleteMode, SoftDeletePolicy, TrashFilter};
pub use transaction::{transaction, SavepointManager};
pub use validation::{Format, ValidationOptions, ValidationRule};
