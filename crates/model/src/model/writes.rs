//! Write operations
//!
//! Every mutation invalidates the model's cache tag once it reached the
//! store, whether or not any row changed.

use serde_json::Value;
use tracing::{debug, warn};

use super::lifecycle::{HookContext, HookOperation, HookStage};
use super::{now_value, Instance, Model};
use crate::backends::{AdapterErrorKind, DatabaseValue, ExecuteResult};
use crate::conditions::{Condition, IntoCondition};
use crate::dialect::InsertIdSource;
use crate::error::{ModelError, ModelResult};
use crate::query::sql::{self, Statement};
use crate::schema::Record;
use crate::soft_delete::{DeleteMode, TrashFilter};
use crate::validation::{validate, ValidationOptions};

/// Per-call switches of a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Return the post-mutation row instead of an affected count
    pub return_latest: bool,
    pub skip_hooks: bool,
    pub skip_validation: bool,
    /// Validation groups; `None` runs every rule
    pub groups: Option<Vec<String>>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults of the `*_many` operations: no hooks, no validation
    pub fn batch() -> Self {
        Self {
            skip_hooks: true,
            skip_validation: true,
            ..Self::default()
        }
    }

    pub fn returning_latest(mut self) -> Self {
        self.return_latest = true;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.skip_hooks = true;
        self
    }

    pub fn with_hooks(mut self) -> Self {
        self.skip_hooks = false;
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    pub fn with_validation(mut self) -> Self {
        self.skip_validation = false;
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }
}

/// Result of an update or delete
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Affected(u64),
    /// Requested with `return_latest`; `None` when nothing matched
    Latest(Option<Instance>),
}

impl MutationOutcome {
    pub fn affected(&self) -> u64 {
        match self {
            MutationOutcome::Affected(count) => *count,
            MutationOutcome::Latest(Some(_)) => 1,
            MutationOutcome::Latest(None) => 0,
        }
    }

    pub fn into_instance(self) -> Option<Instance> {
        match self {
            MutationOutcome::Latest(instance) => instance,
            MutationOutcome::Affected(_) => None,
        }
    }
}

/// What a write statement handed back
enum Written {
    Returned(Vec<Record>),
    Executed(ExecuteResult),
}

impl Model {
    pub async fn create(&self, data: Record) -> ModelResult<Instance> {
        self.create_with(data, WriteOptions::new()).await
    }

    pub async fn create_with(&self, data: Record, options: WriteOptions) -> ModelResult<Instance> {
        let definition = self.definition();
        let mut payload = data;
        definition.apply_set_transforms(&mut payload);
        definition.apply_defaults(&mut payload);
        if let Some((created, updated)) = definition.timestamps().fields() {
            let now = now_value();
            payload.entry(created).or_insert_with(|| now.clone());
            payload.entry(updated).or_insert(now);
        }

        let run_hooks = self.runs_hooks(&options);
        let ctx = self.hook_context(HookOperation::Create, self.key_of(&payload));
        let mut working = payload.clone();
        let validation = self.validation_options(&options, ValidationOptions::new());
        self.pre_persist(HookStage::BeforeCreate, &mut payload, &mut working, &ctx, validation, run_hooks)
            .await?;
        definition.check_nullability(&payload)?;

        let record = self.insert_row(&payload).await?;
        self.invalidate().await;

        if run_hooks {
            let ctx = self.hook_context(HookOperation::Create, self.key_of(&record));
            let hooks = definition.hooks();
            hooks.run_after(HookStage::AfterCreate, &record, &ctx).await?;
            hooks.run_after(HookStage::AfterSave, &record, &ctx).await?;
        }
        Ok(self.hydrate(record))
    }

    /// Create each record in order, stopping at the first failure. Hooks and
    /// validation are skipped.
    pub async fn create_many(&self, records: Vec<Record>) -> ModelResult<Vec<Instance>> {
        self.create_many_with(records, WriteOptions::batch()).await
    }

    pub async fn create_many_with(&self, records: Vec<Record>, options: WriteOptions) -> ModelResult<Vec<Instance>> {
        let mut created = Vec::with_capacity(records.len());
        for record in records {
            created.push(self.create_with(record, options.clone()).await?);
        }
        Ok(created)
    }

    pub async fn update(&self, condition: impl IntoCondition, data: Record) -> ModelResult<MutationOutcome> {
        self.update_with(condition, data, WriteOptions::new()).await
    }

    pub async fn update_by_id(&self, id: impl Into<Value>, data: Record) -> ModelResult<MutationOutcome> {
        self.update_with(Condition::by_key(id), data, WriteOptions::new()).await
    }

    pub async fn update_by_id_with(
        &self,
        id: impl Into<Value>,
        data: Record,
        options: WriteOptions,
    ) -> ModelResult<MutationOutcome> {
        self.update_with(Condition::by_key(id), data, options).await
    }

    /// Update every matching row without hooks or validation
    pub async fn update_many(&self, condition: impl IntoCondition, data: Record) -> ModelResult<u64> {
        Ok(self.update_with(condition, data, WriteOptions::batch()).await?.affected())
    }

    pub async fn update_many_with(
        &self,
        condition: impl IntoCondition,
        data: Record,
        options: WriteOptions,
    ) -> ModelResult<u64> {
        Ok(self.update_with(condition, data, options).await?.affected())
    }

    /// Update live rows matching `condition`.
    ///
    /// With hooks the first matching row is loaded up front and the hooks
    /// see it merged with the payload; when nothing matches, nothing runs.
    pub async fn update_with(
        &self,
        condition: impl IntoCondition,
        data: Record,
        options: WriteOptions,
    ) -> ModelResult<MutationOutcome> {
        let condition = condition.into_condition()?;
        let definition = self.definition();
        let mut payload = data;
        definition.apply_set_transforms(&mut payload);

        if payload.is_empty() {
            debug!("{}: empty update payload", self.name());
            return if options.return_latest {
                let current = self.fetch_first(&condition, TrashFilter::LiveOnly).await?;
                Ok(MutationOutcome::Latest(current.map(|r| self.hydrate(r))))
            } else {
                Ok(MutationOutcome::Affected(0))
            };
        }

        let run_hooks = self.runs_hooks(&options);
        let returning = options.return_latest && self.dialect().supports_returning();
        // Store-backed rules exclude the row being updated, so its key must be known
        let needs_key = !options.skip_validation
            && condition.key_value(self.primary_key()).is_none()
            && definition.schema().has_async_validation_for(&payload);
        let existing = if run_hooks || needs_key || (options.return_latest && !returning) {
            self.fetch_first(&condition, TrashFilter::LiveOnly).await?
        } else {
            None
        };
        if run_hooks && existing.is_none() {
            return Ok(if options.return_latest {
                MutationOutcome::Latest(None)
            } else {
                MutationOutcome::Affected(0)
            });
        }

        if let Some(updated) = definition.timestamps().updated_at() {
            payload.entry(updated).or_insert_with(now_value);
        }

        let key = condition
            .key_value(self.primary_key())
            .cloned()
            .or_else(|| existing.as_ref().and_then(|r| self.key_of(r)));
        let ctx = self.hook_context(HookOperation::Update, key.clone());

        let mut working = existing.clone().unwrap_or_default();
        working.extend(payload.clone());
        let mut base = ValidationOptions::new().partial();
        base.instance_id = key.clone();
        let validation = self.validation_options(&options, base);
        self.pre_persist(HookStage::BeforeUpdate, &mut payload, &mut working, &ctx, validation, run_hooks)
            .await?;
        definition.check_nullability(&payload)?;

        let values = self.encode(&payload)?;
        let context = self.compile_context();
        let plain = sql::update(&context, self.table(), &values, &condition, TrashFilter::LiveOnly, false)?;
        let with_returning = if returning {
            Some(sql::update(&context, self.table(), &values, &condition, TrashFilter::LiveOnly, true)?)
        } else {
            None
        };

        let (affected, returned) = match self.write(with_returning, plain).await? {
            Written::Returned(rows) => (rows.len() as u64, rows.into_iter().next()),
            Written::Executed(result) => (result.affected_or_rows(), None),
        };
        self.invalidate().await;

        let latest = match returned {
            Some(row) => Some(row),
            None if options.return_latest && affected > 0 => {
                self.reload_updated(key.as_ref(), existing.as_ref(), &payload).await?
            }
            None => None,
        };

        if run_hooks && affected > 0 {
            let record = latest.clone().unwrap_or(working);
            let hooks = definition.hooks();
            hooks.run_after(HookStage::AfterUpdate, &record, &ctx).await?;
            hooks.run_after(HookStage::AfterSave, &record, &ctx).await?;
        }

        if options.return_latest {
            Ok(MutationOutcome::Latest(latest.map(|r| self.hydrate(r))))
        } else {
            Ok(MutationOutcome::Affected(affected))
        }
    }

    pub async fn delete(&self, condition: impl IntoCondition) -> ModelResult<MutationOutcome> {
        self.delete_with(condition, WriteOptions::new()).await
    }

    pub async fn delete_by_id(&self, id: impl Into<Value>) -> ModelResult<MutationOutcome> {
        self.delete_with(Condition::by_key(id), WriteOptions::new()).await
    }

    /// Delete every matching row without hooks
    pub async fn delete_many(&self, condition: impl IntoCondition) -> ModelResult<u64> {
        Ok(self.delete_with(condition, WriteOptions::batch()).await?.affected())
    }

    pub async fn delete_many_with(&self, condition: impl IntoCondition, options: WriteOptions) -> ModelResult<u64> {
        Ok(self.delete_with(condition, options).await?.affected())
    }

    /// Tombstone (soft delete) or remove live rows matching `condition`.
    /// Rows already in the trash are left untouched.
    pub async fn delete_with(&self, condition: impl IntoCondition, options: WriteOptions) -> ModelResult<MutationOutcome> {
        let condition = condition.into_condition()?;
        let policy = self.definition().soft_delete();
        let mode = policy.delete_mode();
        let (affected, rows) = self.remove(&condition, mode, policy.delete_filter(), &options).await?;

        if !options.return_latest {
            return Ok(MutationOutcome::Affected(affected));
        }
        if affected == 0 {
            return Ok(MutationOutcome::Latest(None));
        }

        let latest = match (rows.into_iter().next(), mode) {
            (Some(row), DeleteMode::Tombstone) => match self.key_of(&row) {
                Some(key) => self
                    .fetch_first(&Condition::by_key(key), TrashFilter::WithTrashed)
                    .await?
                    .or(Some(row)),
                None => Some(row),
            },
            (row, _) => row,
        };
        Ok(MutationOutcome::Latest(latest.map(|r| self.hydrate(r))))
    }

    /// Remove matching rows for good, trashed or not
    pub async fn force_delete(&self, condition: impl IntoCondition) -> ModelResult<u64> {
        let condition = condition.into_condition()?;
        let filter = self.definition().soft_delete().force_delete_filter();
        let (affected, _) = self
            .remove(&condition, DeleteMode::Purge, filter, &WriteOptions::new())
            .await?;
        Ok(affected)
    }

    /// Bring trashed rows matching `condition` back to life
    pub async fn restore(&self, condition: impl IntoCondition) -> ModelResult<u64> {
        let condition = condition.into_condition()?;
        let definition = self.definition();
        let policy = definition.soft_delete();
        let Some(marker) = policy.marker() else {
            return Err(ModelError::Configuration(format!(
                "Model '{}' does not use soft delete; nothing to restore",
                self.name()
            )));
        };

        let mut values = Record::new();
        values.insert(marker.to_string(), Value::Null);
        if let Some(updated) = definition.timestamps().updated_at() {
            values.insert(updated.to_string(), now_value());
        }
        let statement = sql::update(
            &self.compile_context(),
            self.table(),
            &self.encode(&values)?,
            &condition,
            policy.restore_filter(),
            false,
        )?;
        let affected = self.run_execute(statement).await?.affected_or_rows();
        self.invalidate().await;
        Ok(affected)
    }

    /// Atomically add `amount` to `field` of every live matching row
    pub async fn increment(&self, condition: impl IntoCondition, field: &str, amount: impl Into<Value>) -> ModelResult<u64> {
        self.apply_deltas(condition, vec![(field.to_string(), amount.into())], false)
            .await
    }

    pub async fn decrement(&self, condition: impl IntoCondition, field: &str, amount: impl Into<Value>) -> ModelResult<u64> {
        self.apply_deltas(condition, vec![(field.to_string(), amount.into())], true)
            .await
    }

    /// Several increments in one statement
    pub async fn increment_many<I, S>(&self, condition: impl IntoCondition, amounts: I) -> ModelResult<u64>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let amounts = amounts.into_iter().map(|(f, a)| (f.into(), a)).collect();
        self.apply_deltas(condition, amounts, false).await
    }

    pub async fn decrement_many<I, S>(&self, condition: impl IntoCondition, amounts: I) -> ModelResult<u64>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let amounts = amounts.into_iter().map(|(f, a)| (f.into(), a)).collect();
        self.apply_deltas(condition, amounts, true).await
    }

    async fn apply_deltas(
        &self,
        condition: impl IntoCondition,
        amounts: Vec<(String, Value)>,
        negate: bool,
    ) -> ModelResult<u64> {
        let condition = condition.into_condition()?;
        if amounts.is_empty() {
            return Err(ModelError::Query("Increment needs at least one field".to_string()));
        }

        let deltas = amounts
            .into_iter()
            .map(|(field, amount)| {
                let delta = numeric_delta(&field, &amount, negate)?;
                Ok((field, delta))
            })
            .collect::<ModelResult<Vec<_>>>()?;

        let mut values = Record::new();
        if let Some(updated) = self.definition().timestamps().updated_at() {
            values.insert(updated.to_string(), now_value());
        }
        let statement = sql::increment(
            &self.compile_context(),
            self.table(),
            &deltas,
            &self.encode(&values)?,
            &condition,
            TrashFilter::LiveOnly,
            false,
        )?;
        let affected = self.run_execute(statement).await?.affected_or_rows();
        self.invalidate().await;
        Ok(affected)
    }

    pub(crate) fn runs_hooks(&self, options: &WriteOptions) -> bool {
        !options.skip_hooks && !self.definition().hooks().is_empty()
    }

    fn validation_options(&self, options: &WriteOptions, base: ValidationOptions) -> Option<ValidationOptions> {
        if options.skip_validation || !self.definition().schema().has_validation() {
            return None;
        }
        Some(ValidationOptions {
            groups: options.groups.clone(),
            ..base
        })
    }

    /// Hook stages and validation ahead of an insert or update. Changes made
    /// by hooks or by normalizing rules end up in `payload`.
    async fn pre_persist(
        &self,
        stage: HookStage,
        payload: &mut Record,
        working: &mut Record,
        ctx: &HookContext,
        validation: Option<ValidationOptions>,
        run_hooks: bool,
    ) -> ModelResult<()> {
        let hooks = self.definition().hooks();
        let primary_key = self.primary_key();

        if run_hooks {
            hooks
                .run_before(HookStage::BeforeValidate, working, payload, primary_key, ctx)
                .await?;
        }

        if let Some(validation) = validation {
            let mut candidate = payload.clone();
            validate(self.definition().schema(), &mut candidate, &validation, self).await?;
            for (field, value) in candidate {
                if payload.get(&field) != Some(&value) {
                    working.insert(field.clone(), value.clone());
                    payload.insert(field, value);
                }
            }
        }

        if run_hooks {
            for stage in [HookStage::AfterValidate, stage, HookStage::BeforeSave] {
                debug!("{}: running {}", self.name(), stage);
                hooks.run_before(stage, working, payload, primary_key, ctx).await?;
            }
        }
        Ok(())
    }

    /// Run the RETURNING form when given. If the store rejects it as a
    /// query error, the plain form runs once instead.
    async fn write(&self, returning: Option<Statement>, plain: Statement) -> ModelResult<Written> {
        if let Some(statement) = returning {
            match self.run_query(statement).await {
                Ok(rows) => return Ok(Written::Returned(rows)),
                Err(ModelError::Database(e)) if e.kind == AdapterErrorKind::Query => {
                    warn!("{}: RETURNING rejected ({}), retrying without it", self.name(), e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Written::Executed(self.run_execute(plain).await?))
    }

    async fn insert_row(&self, payload: &Record) -> ModelResult<Record> {
        let values = self.encode(payload)?;
        let context = self.compile_context();
        let plain = sql::insert(&context, self.table(), &values, false)?;
        let with_returning = if self.dialect().supports_returning() {
            Some(sql::insert(&context, self.table(), &values, true)?)
        } else {
            None
        };

        let result = match self.write(with_returning, plain).await? {
            Written::Returned(rows) => match rows.into_iter().next() {
                Some(row) => return Ok(row),
                None => ExecuteResult::default(),
            },
            Written::Executed(result) => result,
        };

        let Some(key) = self.inserted_key(payload, &result).await? else {
            warn!("{}: could not determine the inserted key", self.name());
            return Ok(payload.clone());
        };
        let stored = self
            .fetch_first(&Condition::by_key(key.clone()), TrashFilter::WithTrashed)
            .await?;
        Ok(stored.unwrap_or_else(|| {
            let mut record = payload.clone();
            record.insert(self.primary_key().to_string(), key);
            record
        }))
    }

    /// Key of a freshly inserted row: the caller's own key first, then
    /// whatever the dialect can report
    async fn inserted_key(&self, payload: &Record, result: &ExecuteResult) -> ModelResult<Option<Value>> {
        if let Some(key) = self.key_of(payload) {
            return Ok(Some(key));
        }

        for source in self.dialect().insert_id_sources() {
            let key = match source {
                InsertIdSource::Reported => result.insert_id.as_ref().map(DatabaseValue::to_json),
                InsertIdSource::ReturnedRow => result
                    .rows
                    .first()
                    .and_then(|row| row.get(self.primary_key()))
                    .map(DatabaseValue::to_json),
                InsertIdSource::LastInsertRowid => {
                    let rows = self
                        .adapter()
                        .query("SELECT last_insert_rowid() AS id", &[])
                        .await?;
                    rows.first().and_then(|row| row.get("id")).map(DatabaseValue::to_json)
                }
            };
            if let Some(key) = key.filter(is_usable_key) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Best available picture of a row after an update without RETURNING
    async fn reload_updated(
        &self,
        key: Option<&Value>,
        existing: Option<&Record>,
        payload: &Record,
    ) -> ModelResult<Option<Record>> {
        if let Some(key) = key {
            let reloaded = self
                .fetch_first(&Condition::by_key(key.clone()), TrashFilter::WithTrashed)
                .await?;
            if reloaded.is_some() {
                return Ok(reloaded);
            }
        }

        Ok(existing.map(|existing| {
            warn!("{}: rebuilding the updated row in memory", self.name());
            let mut merged = existing.clone();
            merged.extend(payload.clone());
            merged
        }))
    }

    /// Shared body of delete and force delete. Returns the affected count
    /// and the rows loaded for hooks or `return_latest`.
    async fn remove(
        &self,
        condition: &Condition,
        mode: DeleteMode,
        filter: TrashFilter,
        options: &WriteOptions,
    ) -> ModelResult<(u64, Vec<Record>)> {
        let definition = self.definition();
        let run_hooks = self.runs_hooks(options);
        let rows = if run_hooks || options.return_latest {
            self.fetch_matching(condition, filter).await?
        } else {
            Vec::new()
        };

        let hooks = definition.hooks();
        if run_hooks {
            for row in &rows {
                let ctx = self.hook_context(HookOperation::Delete, self.key_of(row));
                hooks.run_after(HookStage::BeforeDelete, row, &ctx).await?;
            }
        }

        let context = self.compile_context();
        let statement = match (mode, definition.soft_delete().marker()) {
            (DeleteMode::Tombstone, Some(marker)) => {
                let mut values = Record::new();
                values.insert(marker.to_string(), now_value());
                sql::update(&context, self.table(), &self.encode(&values)?, condition, filter, false)?
            }
            _ => sql::delete(&context, self.table(), condition, filter)?,
        };
        let affected = self.run_execute(statement).await?.affected_or_rows();
        self.invalidate().await;

        if run_hooks && affected > 0 {
            for row in &rows {
                let ctx = self.hook_context(HookOperation::Delete, self.key_of(row));
                hooks.run_after(HookStage::AfterDelete, row, &ctx).await?;
            }
        }
        Ok((affected, rows))
    }
}

fn is_usable_key(key: &Value) -> bool {
    !key.is_null() && key.as_i64() != Some(0)
}

fn numeric_delta(field: &str, amount: &Value, negate: bool) -> ModelResult<DatabaseValue> {
    if let Some(n) = amount.as_i64() {
        let delta = if negate { n.checked_neg() } else { Some(n) };
        return delta.map(DatabaseValue::Int64).ok_or_else(|| {
            ModelError::Query(format!("Decrement of '{}' by {} overflows a 64-bit integer", field, n))
        });
    }
    if let Some(n) = amount.as_f64() {
        return Ok(DatabaseValue::Float64(if negate { -n } else { n }));
    }
    Err(ModelError::Query(format!(
        "Cannot increment '{}' by non-numeric amount {}",
        field, amount
    )))
}
