//! Lifecycle hook pipeline
//!
//! Stage order per operation:
//!
//! * create: before_validate, (validate), after_validate, before_create,
//!   before_save, (persist), after_create, after_save
//! * update: before_validate, (validate), after_validate, before_update,
//!   before_save, (persist), after_update, after_save
//! * delete: before_delete per row, (persist), after_delete per row
//!
//! Pre-persist hooks get a mutable working record. After each hook the keys
//! it changed, except the primary key, are merged into the payload.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ModelResult;
use crate::schema::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    BeforeValidate,
    AfterValidate,
    BeforeCreate,
    BeforeUpdate,
    BeforeSave,
    AfterCreate,
    AfterUpdate,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookStage::BeforeValidate => "beforeValidate",
            HookStage::AfterValidate => "afterValidate",
            HookStage::BeforeCreate => "beforeCreate",
            HookStage::BeforeUpdate => "beforeUpdate",
            HookStage::BeforeSave => "beforeSave",
            HookStage::AfterCreate => "afterCreate",
            HookStage::AfterUpdate => "afterUpdate",
            HookStage::AfterSave => "afterSave",
            HookStage::BeforeDelete => "beforeDelete",
            HookStage::AfterDelete => "afterDelete",
        };
        f.write_str(name)
    }
}

/// What a hook knows about the running operation
#[derive(Debug, Clone)]
pub struct HookContext {
    pub model: String,
    pub table: String,
    pub operation: HookOperation,
    /// Primary key of the affected row, when known
    pub key: Option<Value>,
}

/// Hooks a model may register. Every method defaults to a no-op; an error
/// aborts the remaining stages of the operation.
#[async_trait]
pub trait ModelHooks: Send + Sync {
    async fn before_validate(&self, _record: &mut Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn after_validate(&self, _record: &mut Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn before_create(&self, _record: &mut Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn before_update(&self, _record: &mut Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn before_save(&self, _record: &mut Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn after_create(&self, _record: &Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn after_update(&self, _record: &Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn after_save(&self, _record: &Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _record: &Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }

    async fn after_delete(&self, _record: &Record, _ctx: &HookContext) -> ModelResult<()> {
        Ok(())
    }
}

/// Registered hooks of one model, run in registration order
#[derive(Clone, Default)]
pub struct Hooks {
    handlers: Vec<Arc<dyn ModelHooks>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hooks: Arc<dyn ModelHooks>) {
        self.handlers.push(hooks);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Run a pre-persist stage on `working` and merge what each hook changed
    /// into `payload`
    pub async fn run_before(
        &self,
        stage: HookStage,
        working: &mut Record,
        payload: &mut Record,
        primary_key: &str,
        ctx: &HookContext,
    ) -> ModelResult<()> {
        for handler in &self.handlers {
            let snapshot = working.clone();
            match stage {
                HookStage::BeforeValidate => handler.before_validate(working, ctx).await?,
                HookStage::AfterValidate => handler.after_validate(working, ctx).await?,
                HookStage::BeforeCreate => handler.before_create(working, ctx).await?,
                HookStage::BeforeUpdate => handler.before_update(working, ctx).await?,
                HookStage::BeforeSave => handler.before_save(working, ctx).await?,
                other => {
                    debug!("Stage {} does not mutate; skipping diff", other);
                    continue;
                }
            }
            merge_changes(&snapshot, working, payload, primary_key);
        }
        Ok(())
    }

    /// Run a post-persist or delete stage
    pub async fn run_after(&self, stage: HookStage, record: &Record, ctx: &HookContext) -> ModelResult<()> {
        for handler in &self.handlers {
            match stage {
                HookStage::AfterCreate => handler.after_create(record, ctx).await?,
                HookStage::AfterUpdate => handler.after_update(record, ctx).await?,
                HookStage::AfterSave => handler.after_save(record, ctx).await?,
                HookStage::BeforeDelete => handler.before_delete(record, ctx).await?,
                HookStage::AfterDelete => handler.after_delete(record, ctx).await?,
                other => debug!("Stage {} needs a mutable record; skipping", other),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").field("handlers", &self.handlers.len()).finish()
    }
}

/// Copy keys whose value differs from `before` into `payload`, skipping the
/// primary key
pub fn merge_changes(before: &Record, after: &Record, payload: &mut Record, primary_key: &str) {
    for (key, value) in after {
        if key == primary_key {
            continue;
        }
        if before.get(key) != Some(value) {
            payload.insert(key.clone(), value.clone());
        }
    }
}
