//! Model handles and operations
//!
//! A [`Model`] pairs a shared [`ModelDefinition`] with the adapter it runs
//! against and, optionally, a cache. Handles are cheap to clone; every clone
//! sees the same definition and signature cache.

pub mod composite;
pub mod config;
pub mod definition;
pub mod instance;
pub mod lifecycle;
pub mod reads;
pub mod registry;
pub mod store;
pub mod writes;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub use config::{ModelConfig, ModelConfigBuilder, Timestamps};
pub use definition::{ModelDefinition, ModelDefinitionBuilder};
pub use instance::{Instance, VirtualField, VirtualFn};
pub use lifecycle::{HookContext, HookOperation, HookStage, Hooks, ModelHooks};
pub use registry::ModelRegistry;
pub use writes::{MutationOutcome, WriteOptions};

use crate::backends::{DatabaseAdapter, DatabaseRow, DatabaseTransaction, ExecuteResult};
use crate::cache::{table_tag, CacheAdapter, KeyCache, QueryKey};
use crate::conditions::{CompileContext, Condition};
use crate::dialect::SqlDialect;
use crate::error::ModelResult;
use crate::query::sql::{self, Assignment, Statement};
use crate::query::QueryState;
use crate::schema::coercion::date_to_json;
use crate::schema::{from_db, to_db, Record};
use crate::soft_delete::TrashFilter;

/// A model bound to an adapter
#[derive(Clone)]
pub struct Model {
    definition: Arc<ModelDefinition>,
    adapter: Arc<dyn DatabaseAdapter>,
    cache: Option<Arc<dyn CacheAdapter>>,
    keys: Arc<KeyCache>,
    cache_reads: bool,
}

impl Model {
    pub fn new(definition: impl Into<Arc<ModelDefinition>>, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        let definition = definition.into();
        let keys = Arc::new(KeyCache::new(*definition.config().get_signature_cache_capacity()));
        Self {
            definition,
            adapter,
            cache: None,
            keys,
            cache_reads: true,
        }
    }

    /// Attach a cache for reads and invalidation
    pub fn with_cache(mut self, cache: Arc<dyn CacheAdapter>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Same model running against another adapter, typically a transaction.
    ///
    /// Writes through the bound handle still invalidate the cache; reads
    /// bypass it so uncommitted rows are never cached.
    pub fn bind(&self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            definition: self.definition.clone(),
            adapter,
            cache: self.cache.clone(),
            keys: self.keys.clone(),
            cache_reads: false,
        }
    }

    /// Shorthand for binding to an open transaction
    pub fn in_transaction(&self, tx: &Arc<dyn DatabaseTransaction>) -> Self {
        self.bind(tx.clone().as_adapter())
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheAdapter>> {
        self.cache.as_ref()
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn table(&self) -> &str {
        self.definition.table()
    }

    pub fn primary_key(&self) -> &str {
        self.definition.primary_key()
    }

    pub fn dialect(&self) -> SqlDialect {
        self.adapter.dialect()
    }

    /// Number of memoized cache keys
    pub fn signature_cache_len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn compile_context(&self) -> CompileContext<'_> {
        CompileContext::new(self.dialect(), self.primary_key())
            .with_schema(self.definition.schema())
            .with_soft_delete(self.definition.soft_delete())
    }

    /// Decode a driver row through the schema's field types
    pub(crate) fn decode_row(&self, row: DatabaseRow) -> Record {
        row.into_columns()
            .into_iter()
            .map(|(name, value)| {
                let decoded = from_db(self.definition.field_type(&name), value);
                (name, decoded)
            })
            .collect()
    }

    /// Apply `get` transforms and compute virtuals
    pub(crate) fn hydrate(&self, mut record: Record) -> Instance {
        self.definition.apply_get_transforms(&mut record);
        Instance::hydrate(record, self.definition.virtuals())
    }

    /// Apply `get` transforms only
    pub(crate) fn present(&self, mut record: Record) -> Record {
        self.definition.apply_get_transforms(&mut record);
        record
    }

    /// Encode a payload column by column
    pub(crate) fn encode(&self, record: &Record) -> ModelResult<Vec<Assignment>> {
        let dialect = self.dialect();
        record
            .iter()
            .map(|(name, value)| Ok((name.clone(), to_db(self.definition.field_type(name), value, dialect)?)))
            .collect()
    }

    pub(crate) async fn run_query(&self, statement: Statement) -> ModelResult<Vec<Record>> {
        debug!("{}: {}", self.name(), statement.sql);
        let rows = self.adapter.query(&statement.sql, &statement.params).await?;
        Ok(rows.into_iter().map(|row| self.decode_row(row)).collect())
    }

    pub(crate) async fn run_execute(&self, statement: Statement) -> ModelResult<ExecuteResult> {
        debug!("{}: {}", self.name(), statement.sql);
        Ok(self.adapter.execute(&statement.sql, &statement.params).await?)
    }

    /// First row matching `condition`, straight from the store
    pub(crate) async fn fetch_first(&self, condition: &Condition, filter: TrashFilter) -> ModelResult<Option<Record>> {
        let mut state = QueryState::with_condition(condition.clone());
        state.include_trashed = filter != TrashFilter::LiveOnly;
        state.only_trashed = filter == TrashFilter::OnlyTrashed;
        state.limit = Some(1);
        let statement = sql::select(&self.compile_context(), self.table(), &state)?;
        Ok(self.run_query(statement).await?.into_iter().next())
    }

    /// Every row matching `condition`, straight from the store
    pub(crate) async fn fetch_matching(&self, condition: &Condition, filter: TrashFilter) -> ModelResult<Vec<Record>> {
        let mut state = QueryState::with_condition(condition.clone());
        state.include_trashed = filter != TrashFilter::LiveOnly;
        state.only_trashed = filter == TrashFilter::OnlyTrashed;
        let statement = sql::select(&self.compile_context(), self.table(), &state)?;
        self.run_query(statement).await
    }

    /// Serve `load` through the cache when one is attached.
    ///
    /// Cache failures never fail the read; they are logged and the store
    /// answers instead.
    pub(crate) async fn cached<T, F>(&self, operation: &str, state: &QueryState, load: F) -> ModelResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = ModelResult<T>>,
    {
        let Some(cache) = self.cache.as_ref().filter(|_| self.cache_reads) else {
            return load.await;
        };

        let key = self.keys.key_for(&QueryKey {
            table: self.table(),
            operation,
            condition: &state.condition,
            fields: &state.fields,
            sort: &state.sort,
            skip: state.skip,
            limit: state.limit,
            trash: state.trash_filter(),
        });

        match cache.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(hit) => {
                    debug!("Cache hit: {}", key);
                    return Ok(hit);
                }
                Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => debug!("Cache miss: {}", key),
            Err(e) => warn!("Cache read failed for {}: {}", key, e),
        }

        let fresh = load.await?;
        match serde_json::to_value(&fresh) {
            Ok(value) => {
                let ttl = *self.definition.config().get_cache_ttl();
                if let Err(e) = cache.set(&key, value, ttl, &[table_tag(self.table())]).await {
                    warn!("Cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Could not serialize result for {}: {}", key, e),
        }
        Ok(fresh)
    }

    /// Drop every cached read of this model's table
    pub(crate) async fn invalidate(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.delete_by_tags(&[table_tag(self.table())]).await {
            Ok(removed) => debug!("Invalidated {} cache entries for {}", removed, self.table()),
            Err(e) => warn!("Cache invalidation failed for {}: {}", self.table(), e),
        }
    }

    pub(crate) fn hook_context(&self, operation: HookOperation, key: Option<Value>) -> HookContext {
        HookContext {
            model: self.name().to_string(),
            table: self.table().to_string(),
            operation,
            key,
        }
    }

    /// Primary key value of a record, ignoring nulls
    pub(crate) fn key_of(&self, record: &Record) -> Option<Value> {
        record.get(self.primary_key()).filter(|v| !v.is_null()).cloned()
    }
}

/// Current time in the canonical record form
pub(crate) fn now_value() -> Value {
    date_to_json(&Utc::now())
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("table", &self.table())
            .field("dialect", &self.dialect())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
