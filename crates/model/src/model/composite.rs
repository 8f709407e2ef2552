//! Composite operations built from reads and writes

use serde_json::Value;
use tracing::{debug, warn};

use super::{now_value, Instance, Model, MutationOutcome, WriteOptions};
use crate::conditions::{Condition, FieldPredicate, IntoCondition, PRIMARY_KEY_ALIAS};
use crate::error::ModelResult;
use crate::query::sql;
use crate::schema::Record;
use crate::soft_delete::TrashFilter;

impl Model {
    /// Insert `data`, or update the live row matching `condition`.
    ///
    /// A single `INSERT .. ON CONFLICT` (or `ON DUPLICATE KEY`) statement is
    /// tried first when the model allows it; any failure there falls back to
    /// a find followed by an update or a create.
    pub async fn upsert(&self, condition: impl IntoCondition, data: Record) -> ModelResult<Instance> {
        let condition = condition.into_condition()?;

        if let Some(conflict) = self.native_conflict_fields(&condition) {
            match self.native_upsert(&conflict, &data).await {
                Ok(instance) => return Ok(instance),
                Err(e) => warn!("{}: native upsert failed ({}), falling back", self.name(), e),
            }
        }

        match self.fetch_first(&condition, TrashFilter::LiveOnly).await? {
            Some(existing) => {
                let target = self.target_of(&existing, &condition);
                let outcome = self
                    .update_with(target, data, WriteOptions::new().returning_latest())
                    .await?;
                Ok(outcome.into_instance().unwrap_or_else(|| self.hydrate(existing)))
            }
            None => {
                let mut payload = data;
                for (field, value) in self.equality_fields(&condition) {
                    payload.entry(field).or_insert(value);
                }
                self.create(payload).await
            }
        }
    }

    /// First live row matching `condition`, or a new one built from
    /// `defaults` plus the condition's equality fields. The flag tells
    /// whether the row was created.
    pub async fn find_or_create(&self, condition: impl IntoCondition, defaults: Record) -> ModelResult<(Instance, bool)> {
        let condition = condition.into_condition()?;
        if let Some(found) = self.find(condition.clone()).find_one().await? {
            return Ok((found, false));
        }

        let mut payload = defaults;
        payload.extend(self.equality_fields(&condition));
        Ok((self.create(payload).await?, true))
    }

    /// Update the first live match and return it as updated
    pub async fn find_one_and_update(&self, condition: impl IntoCondition, data: Record) -> ModelResult<Option<Instance>> {
        let condition = condition.into_condition()?;
        let Some(existing) = self.fetch_first(&condition, TrashFilter::LiveOnly).await? else {
            return Ok(None);
        };
        let target = self.target_of(&existing, &condition);
        let outcome = self
            .update_with(target, data, WriteOptions::new().returning_latest())
            .await?;
        Ok(outcome.into_instance())
    }

    /// Delete the first live match and return it as it was
    pub async fn find_one_and_delete(&self, condition: impl IntoCondition) -> ModelResult<Option<Instance>> {
        let condition = condition.into_condition()?;
        let Some(existing) = self.fetch_first(&condition, TrashFilter::LiveOnly).await? else {
            return Ok(None);
        };
        let target = self.target_of(&existing, &condition);
        match self.delete(target).await? {
            MutationOutcome::Affected(0) => Ok(None),
            _ => Ok(Some(self.hydrate(existing))),
        }
    }

    /// Replace the first live match with `replacement`. Schema fields the
    /// replacement leaves out are reset to their default, or null.
    pub async fn find_one_and_replace(
        &self,
        condition: impl IntoCondition,
        replacement: Record,
    ) -> ModelResult<Option<Instance>> {
        let condition = condition.into_condition()?;
        let Some(existing) = self.fetch_first(&condition, TrashFilter::LiveOnly).await? else {
            return Ok(None);
        };

        let definition = self.definition();
        let timestamps = definition.timestamps();
        let marker = definition.soft_delete().marker();
        let mut payload = replacement;
        for (name, field) in definition.schema().iter() {
            let managed = name == self.primary_key()
                || Some(name) == timestamps.created_at()
                || Some(name) == timestamps.updated_at()
                || Some(name) == marker;
            if managed || payload.contains_key(name) {
                continue;
            }
            let reset = field.default.as_ref().map(|d| d.resolve()).unwrap_or(Value::Null);
            payload.insert(name.to_string(), reset);
        }

        let target = self.target_of(&existing, &condition);
        let outcome = self
            .update_with(target, payload, WriteOptions::new().returning_latest())
            .await?;
        Ok(outcome.into_instance())
    }

    /// Conflict columns and values when the single-statement upsert applies
    fn native_conflict_fields(&self, condition: &Condition) -> Option<Vec<(String, Value)>> {
        let definition = self.definition();
        if !*definition.config().get_native_upsert()
            || !definition.hooks().is_empty()
            || definition.schema().has_validation()
            || definition.soft_delete().enabled
        {
            return None;
        }

        let Condition::Fields(map) = condition else {
            return None;
        };
        if map.is_empty() {
            return None;
        }

        map.iter()
            .map(|(field, predicates)| match predicates.as_slice() {
                [FieldPredicate::Eq(value)] if !value.is_null() => Some((self.field_name(field), value.clone())),
                _ => None,
            })
            .collect()
    }

    async fn native_upsert(&self, conflict: &[(String, Value)], data: &Record) -> ModelResult<Instance> {
        let definition = self.definition();
        let mut payload = data.clone();
        for (field, value) in conflict {
            payload.insert(field.clone(), value.clone());
        }
        definition.apply_set_transforms(&mut payload);
        definition.apply_defaults(&mut payload);
        if let Some((created, updated)) = definition.timestamps().fields() {
            let now = now_value();
            payload.entry(created).or_insert_with(|| now.clone());
            payload.entry(updated).or_insert(now);
        }
        definition.check_nullability(&payload)?;

        let conflict_columns: Vec<String> = conflict.iter().map(|(f, _)| f.clone()).collect();
        let mut update_columns: Vec<String> = data
            .keys()
            .filter(|k| !conflict_columns.contains(k))
            .cloned()
            .collect();
        if let Some(updated) = definition.timestamps().updated_at() {
            if !update_columns.iter().any(|c| c == updated) {
                update_columns.push(updated.to_string());
            }
        }

        let statement = sql::upsert(
            &self.compile_context(),
            self.table(),
            &self.encode(&payload)?,
            &conflict_columns,
            &update_columns,
        )?;
        let returned = if self.dialect().supports_returning() {
            self.run_query(statement).await?.into_iter().next()
        } else {
            self.run_execute(statement).await?;
            None
        };
        self.invalidate().await;

        let row = match returned {
            Some(row) => row,
            None => {
                debug!("{}: reading upserted row back", self.name());
                let lookup = conflict
                    .iter()
                    .fold(Condition::new(), |c, (field, value)| c.eq(field.clone(), value.clone()));
                self.fetch_first(&lookup, TrashFilter::WithTrashed)
                    .await?
                    .unwrap_or(payload)
            }
        };
        Ok(self.hydrate(row))
    }

    /// Plain equality fields of a condition, with the key alias resolved
    fn equality_fields(&self, condition: &Condition) -> Record {
        match condition {
            Condition::ByKey(key) => {
                let mut fields = Record::new();
                fields.insert(self.primary_key().to_string(), key.clone());
                fields
            }
            Condition::Fields(map) => map
                .iter()
                .filter_map(|(field, predicates)| match predicates.as_slice() {
                    [FieldPredicate::Eq(value)] => Some((self.field_name(field), value.clone())),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Narrow a write to one row when its key is known
    fn target_of(&self, existing: &Record, condition: &Condition) -> Condition {
        self.key_of(existing)
            .map(Condition::by_key)
            .unwrap_or_else(|| condition.clone())
    }

    fn field_name(&self, field: &str) -> String {
        if field == PRIMARY_KEY_ALIAS {
            self.primary_key().to_string()
        } else {
            field.to_string()
        }
    }
}
