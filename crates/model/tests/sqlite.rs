//! End-to-end behavior against an in-memory SQLite database

use std::sync::Arc;

use async_trait::async_trait;
use elif_model::{
    transaction, AdapterResult, DatabaseAdapter, DatabaseRow, DatabaseTransaction, DatabaseValue, ExecuteResult,
    FieldDefinition, FieldType, MemoryCache, MemoryCacheConfig, Migration, MigrationRunner, Model, ModelConfig,
    ModelDefinition, ModelError, MutationOutcome, Record, SavepointManager, SqlDialect, SqlMigration, SqliteAdapter,
    Timestamps, ValidationRule, WriteOptions,
};
use serde_json::{json, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

async fn database() -> Arc<SqliteAdapter> {
    init_tracing();
    let adapter = SqliteAdapter::in_memory().await.unwrap();
    for ddl in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL, name TEXT, \
         active INTEGER NOT NULL DEFAULT 1, logins INTEGER NOT NULL DEFAULT 0, \
         createdAt TEXT, updatedAt TEXT, deletedAt TEXT)",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, slug TEXT NOT NULL UNIQUE, label TEXT)",
    ] {
        adapter.execute(ddl, &[]).await.unwrap();
    }
    Arc::new(adapter)
}

fn users(adapter: Arc<dyn DatabaseAdapter>) -> Model {
    let definition = ModelDefinition::builder("User")
        .config(ModelConfig::new("users").soft_delete(true).timestamps(Timestamps::Enabled))
        .field(
            "email",
            FieldDefinition::new(FieldType::String)
                .not_null()
                .validate(ValidationRule::new().required().trim().lowercase().email().unique()),
        )
        .field("name", FieldDefinition::new(FieldType::String))
        .field("active", FieldDefinition::new(FieldType::Boolean).default_value(true))
        .field("logins", FieldDefinition::new(FieldType::Number).default_value(0))
        .scope("active", json!({ "active": true }))
        .build()
        .unwrap();
    Model::new(definition, adapter)
}

fn tags(adapter: Arc<dyn DatabaseAdapter>, native_upsert: bool) -> Model {
    let definition = ModelDefinition::builder("Tag")
        .config(ModelConfig::new("tags").native_upsert(native_upsert))
        .field("slug", FieldDefinition::new(FieldType::String).not_null())
        .field("label", FieldDefinition::new(FieldType::String))
        .build()
        .unwrap();
    Model::new(definition, adapter)
}

/// SQLite posing as MySQL: no RETURNING, keys come from the reported insert id
struct MySqlFlavored(Arc<SqliteAdapter>);

#[async_trait]
impl DatabaseAdapter for MySqlFlavored {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<Vec<DatabaseRow>> {
        self.0.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> AdapterResult<ExecuteResult> {
        self.0.execute(sql, params).await
    }

    async fn begin_transaction(&self) -> AdapterResult<Arc<dyn DatabaseTransaction>> {
        self.0.begin_transaction().await
    }
}

#[tokio::test]
async fn test_create_normalizes_and_rejects_taken_email() {
    let users = users(database().await);

    let created = users
        .create(record(json!({ "email": "  Ada@Example.com ", "name": "Ada" })))
        .await
        .unwrap();
    assert_eq!(created.get("email"), Some(&json!("ada@example.com")));
    assert_eq!(created.get("active"), Some(&json!(true)));
    assert_eq!(created.get("logins"), Some(&json!(0)));
    assert!(created.get("createdAt").is_some_and(Value::is_string));

    let err = users
        .create(record(json!({ "email": "ADA@example.com" })))
        .await
        .unwrap_err();
    let failure = err.as_validation().unwrap();
    assert_eq!(failure.field, "email");
    assert_eq!(users.count(json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unique_update_through_field_condition() {
    let users = users(database().await);
    users
        .create(record(json!({ "email": "ada@example.com", "name": "Ada" })))
        .await
        .unwrap();
    users
        .create(record(json!({ "email": "bob@example.com", "name": "Bob" })))
        .await
        .unwrap();

    let kept = users
        .update(json!({ "name": "Ada" }), record(json!({ "email": " ADA@example.com " })))
        .await
        .unwrap();
    assert_eq!(kept, MutationOutcome::Affected(1));

    let err = users
        .update(json!({ "name": "Ada" }), record(json!({ "email": "Bob@Example.com" })))
        .await
        .unwrap_err();
    assert_eq!(err.as_validation().unwrap().field, "email");

    let changed = users
        .update(json!({ "name": "Ada" }), record(json!({ "email": "ada.l@example.com" })))
        .await
        .unwrap();
    assert_eq!(changed, MutationOutcome::Affected(1));
    assert!(users.exists(json!({ "email": "ada.l@example.com" })).await.unwrap());
}

#[tokio::test]
async fn test_increment_twice_accumulates() {
    let users = users(database().await);
    let ada = users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    let id = ada.get("id").cloned().unwrap();

    assert_eq!(users.increment(id.clone(), "logins", 1).await.unwrap(), 1);
    assert_eq!(users.increment(id.clone(), "logins", 1).await.unwrap(), 1);
    assert_eq!(users.decrement(id.clone(), "logins", 5).await.unwrap(), 1);

    let reloaded = users.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(reloaded.get("logins"), Some(&json!(-3)));
}

#[tokio::test]
async fn test_upsert_twice_keeps_one_row() {
    let adapter = database().await;
    for native in [true, false] {
        let tags = tags(adapter.clone(), native);
        let slug = if native { "rust" } else { "sql" };

        let first = tags
            .upsert(json!({ "slug": slug }), record(json!({ "label": "First" })))
            .await
            .unwrap();
        let second = tags
            .upsert(json!({ "slug": slug }), record(json!({ "label": "Second" })))
            .await
            .unwrap();

        assert_eq!(first.get("id"), second.get("id"));
        assert_eq!(second.get("label"), Some(&json!("Second")));
        assert_eq!(tags.count(json!({ "slug": slug })).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_soft_delete_lifecycle() {
    let users = users(database().await);
    let ada = users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    let id = ada.get("id").cloned().unwrap();

    assert_eq!(users.delete_by_id(id.clone()).await.unwrap(), MutationOutcome::Affected(1));
    assert_eq!(users.delete_by_id(id.clone()).await.unwrap(), MutationOutcome::Affected(0));
    assert!(users.find_by_id(id.clone()).await.unwrap().is_none());

    let mut trashed = users.query();
    trashed.only_trashed();
    let rows = trashed.find_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("deletedAt").is_some_and(|v| !v.is_null()));

    assert_eq!(users.restore(id.clone()).await.unwrap(), 1);
    assert!(users.find_by_id(id.clone()).await.unwrap().is_some());

    assert_eq!(users.force_delete(id.clone()).await.unwrap(), 1);
    let mut everything = users.query();
    everything.with_trashed();
    assert_eq!(everything.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_chain_writes_respect_trash_and_window() {
    let users = users(database().await);
    let ada = users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    users.create(record(json!({ "email": "bob@example.com" }))).await.unwrap();
    users.delete_by_id(ada.get("id").cloned().unwrap()).await.unwrap();

    let mut trashed = users.query();
    trashed.only_trashed();
    assert!(matches!(trashed.delete().await, Err(ModelError::Query(_))));
    assert_eq!(users.count(json!({})).await.unwrap(), 1);
    assert_eq!(trashed.restore().await.unwrap(), 1);

    let mut first = users.query();
    first.order_by("id").limit(1);
    assert!(matches!(first.delete().await, Err(ModelError::Query(_))));
    assert_eq!(users.count(json!({})).await.unwrap(), 2);
}

#[tokio::test]
async fn test_cached_reads_follow_writes() {
    let cache = Arc::new(MemoryCache::new(MemoryCacheConfig::default()));
    let users = users(database().await).with_cache(cache.clone());

    assert!(users.find_all(json!({})).await.unwrap().is_empty());
    assert!(!cache.is_empty());

    users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    assert_eq!(users.find_all(json!({})).await.unwrap().len(), 1);

    users.update_many(json!({}), record(json!({ "name": "Renamed" }))).await.unwrap();
    let found = users.find_one(json!({})).await.unwrap().unwrap();
    assert_eq!(found.get("name"), Some(&json!("Renamed")));
}

#[tokio::test]
async fn test_cache_drops_after_restore_purge_increment_and_upsert() {
    let adapter = database().await;
    let cache = Arc::new(MemoryCache::new(MemoryCacheConfig::default()));
    let users = users(adapter.clone()).with_cache(cache.clone());
    let ada = users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    let id = ada.get("id").cloned().unwrap();

    assert_eq!(users.find_by_id(id.clone()).await.unwrap().unwrap().get("logins"), Some(&json!(0)));
    users.increment(id.clone(), "logins", 2).await.unwrap();
    assert_eq!(users.find_by_id(id.clone()).await.unwrap().unwrap().get("logins"), Some(&json!(2)));

    users.delete_by_id(id.clone()).await.unwrap();
    assert!(users.find_by_id(id.clone()).await.unwrap().is_none());
    users.restore(id.clone()).await.unwrap();
    assert!(users.find_by_id(id.clone()).await.unwrap().is_some());

    users.force_delete(id.clone()).await.unwrap();
    assert!(users.find_by_id(id.clone()).await.unwrap().is_none());
    assert_eq!(users.count(json!({})).await.unwrap(), 0);

    let tags = tags(adapter, false).with_cache(cache.clone());
    assert!(tags.find_one(json!({ "slug": "rust" })).await.unwrap().is_none());
    tags.upsert(json!({ "slug": "rust" }), record(json!({ "label": "Rust" })))
        .await
        .unwrap();
    let found = tags.find_one(json!({ "slug": "rust" })).await.unwrap().unwrap();
    assert_eq!(found.get("label"), Some(&json!("Rust")));

    tags.upsert(json!({ "slug": "rust" }), record(json!({ "label": "Rust 2" })))
        .await
        .unwrap();
    let found = tags.find_one(json!({ "slug": "rust" })).await.unwrap().unwrap();
    assert_eq!(found.get("label"), Some(&json!("Rust 2")));
}

#[tokio::test]
async fn test_chain_builder_and_scopes() {
    let users = users(database().await);
    for (email, active) in [("a@x.com", true), ("b@x.com", false), ("c@x.com", true)] {
        users
            .create(record(json!({ "email": email, "active": active })))
            .await
            .unwrap();
    }

    let active = users.scope("active").order_by_desc("email").find_all().await.unwrap();
    let emails: Vec<&Value> = active.iter().filter_map(|u| u.get("email")).collect();
    assert_eq!(emails, vec![&json!("c@x.com"), &json!("a@x.com")]);

    let page = users.paginate(json!({}), 2, 2).await.unwrap();
    assert_eq!((page.total, page.total_pages, page.items.len()), (3, 2, 1));
    assert!(page.has_prev && !page.has_next);

    let flags = users.distinct("active", json!({})).await.unwrap();
    assert_eq!(flags.len(), 2);

    assert!(users.exists(json!({ "email": { "$like": "%@x.com" } })).await.unwrap());
    assert!(matches!(
        users.scope("missing").find_all().await,
        Err(ModelError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_return_latest_without_returning_support() {
    let sqlite = database().await;
    let users = users(Arc::new(MySqlFlavored(sqlite)));

    let ada = users.create(record(json!({ "email": "ada@example.com" }))).await.unwrap();
    let id = ada.get("id").cloned().unwrap();
    assert_eq!(id, json!(1));

    let latest = users
        .update_by_id_with(id.clone(), record(json!({ "name": "Ada" })), WriteOptions::new().returning_latest())
        .await
        .unwrap()
        .into_instance()
        .unwrap();
    assert_eq!(latest.get("name"), Some(&json!("Ada")));
    assert_eq!(latest.get("email"), Some(&json!("ada@example.com")));
}

#[tokio::test]
async fn test_transaction_commits_or_rolls_back() {
    let adapter = database().await;
    let users = users(adapter.clone());

    let bound = users.clone();
    let failed: Result<(), ModelError> = transaction(adapter.as_ref(), move |tx| {
        Box::pin(async move {
            bound
                .in_transaction(&tx)
                .create(record(json!({ "email": "ghost@example.com" })))
                .await?;
            Err(ModelError::Query("abort".to_string()))
        })
    })
    .await;
    assert!(failed.is_err());
    assert_eq!(users.count(json!({})).await.unwrap(), 0);

    let bound = users.clone();
    transaction(adapter.as_ref(), move |tx| {
        Box::pin(async move {
            bound
                .in_transaction(&tx)
                .create(record(json!({ "email": "kept@example.com" })))
                .await
                .map(|_| ())
        })
    })
    .await
    .unwrap();
    assert_eq!(users.count(json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_savepoint_discards_partial_work() {
    let adapter = database().await;
    let users = users(adapter.clone());

    let tx = adapter.begin_transaction().await.unwrap();
    let bound = users.in_transaction(&tx);
    let mut savepoints = SavepointManager::new(tx.clone());

    bound.create(record(json!({ "email": "first@example.com" }))).await.unwrap();
    let savepoint = savepoints.create_savepoint().await.unwrap();
    bound.create(record(json!({ "email": "second@example.com" }))).await.unwrap();
    savepoints.rollback_to_savepoint(&savepoint).await.unwrap();
    tx.commit().await.unwrap();

    let remaining = users.find_all(json!({})).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("email"), Some(&json!("first@example.com")));
}

#[tokio::test]
async fn test_migrations_apply_once_and_roll_back() {
    init_tracing();
    let adapter: Arc<dyn DatabaseAdapter> = Arc::new(SqliteAdapter::in_memory().await.unwrap());
    let migration = SqlMigration::new("001_create_posts")
        .up_sql("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
        .down_sql("DROP TABLE posts");
    assert_eq!(migration.name(), "001_create_posts");
    let runner = MigrationRunner::new(adapter.clone()).add(migration);

    let first = runner.run().await.unwrap();
    assert_eq!(first.applied, vec!["001_create_posts".to_string()]);
    let second = runner.run().await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped, 1);
    adapter.execute("INSERT INTO posts (title) VALUES ('hello')", &[]).await.unwrap();

    assert_eq!(runner.rollback_last().await.unwrap(), Some("001_create_posts".to_string()));
    assert!(adapter.query("SELECT * FROM posts", &[]).await.is_err());
    assert!(!runner.status().await.unwrap()[0].applied);
}
