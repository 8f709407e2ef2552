//! Fluent chain query
//!
//! Builder methods mutate one [`QueryState`] in place and return `&mut Self`;
//! terminals read it. Builder mistakes are held in the state and reported by
//! the first terminal, before any statement runs. Write terminals also refuse
//! a window or an ordering, and a trash flag other than the one they target.

use serde_json::Value;

use super::pagination::Page;
use super::state::QueryState;
use crate::conditions::{Condition, FieldPredicate, IntoCondition, SortDirection};
use crate::error::{ModelError, ModelResult};
use crate::model::{Instance, Model, MutationOutcome, WriteOptions};
use crate::schema::Record;
use crate::soft_delete::{SoftDeletePolicy, TrashFilter};

/// Query over one model with owned, mutable state
#[derive(Clone, Debug)]
pub struct ChainQuery {
    model: Model,
    state: QueryState,
}

impl ChainQuery {
    pub fn new(model: Model, state: QueryState) -> Self {
        Self { model, state }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Overlay a condition; for fields already constrained, the new
    /// predicates win
    pub fn where_condition(&mut self, condition: impl IntoCondition) -> &mut Self {
        match condition.into_condition() {
            Ok(condition) => {
                let current = std::mem::take(&mut self.state.condition);
                self.state.condition = current.merge(condition);
            }
            Err(e) => self.state.fail(e),
        }
        self
    }

    fn predicate(&mut self, field: impl Into<String>, predicate: FieldPredicate) -> &mut Self {
        self.state.condition.insert(field, predicate);
        self
    }

    pub fn where_eq(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Eq(value.into()))
    }

    pub fn where_ne(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Ne(value.into()))
    }

    pub fn where_gt(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Gt(value.into()))
    }

    pub fn where_gte(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Gte(value.into()))
    }

    pub fn where_lt(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Lt(value.into()))
    }

    pub fn where_lte(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicate(field, FieldPredicate::Lte(value.into()))
    }

    pub fn where_in<I, V>(&mut self, field: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.predicate(field, FieldPredicate::In(values))
    }

    pub fn where_like(&mut self, field: impl Into<String>, pattern: impl Into<String>) -> &mut Self {
        self.predicate(field, FieldPredicate::Like(pattern.into()))
    }

    pub fn where_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.predicate(field, FieldPredicate::IsNull)
    }

    /// Project the given fields only
    pub fn select<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(&mut self, field: impl Into<String>) -> &mut Self {
        self.state.sort.push(field, SortDirection::Asc);
        self
    }

    pub fn order_by_desc(&mut self, field: impl Into<String>) -> &mut Self {
        self.state.sort.push(field, SortDirection::Desc);
        self
    }

    pub fn skip(&mut self, count: u64) -> &mut Self {
        self.state.skip = Some(count);
        self
    }

    pub fn limit(&mut self, count: u64) -> &mut Self {
        self.state.limit = Some(count);
        self
    }

    /// Include soft-deleted rows
    pub fn with_trashed(&mut self) -> &mut Self {
        self.state.include_trashed = true;
        self
    }

    /// Only soft-deleted rows
    pub fn only_trashed(&mut self) -> &mut Self {
        self.state.only_trashed = true;
        self
    }

    /// Apply a named scope underneath the current condition
    pub fn scope(&mut self, name: &str) -> &mut Self {
        match self.model.definition().scope(name) {
            Some(scope) => {
                let current = std::mem::take(&mut self.state.condition);
                self.state.condition = scope.clone().merge(current);
            }
            None => self.state.fail(ModelError::Configuration(format!(
                "Scope '{}' is not defined on model '{}'",
                name,
                self.model.name()
            ))),
        }
        self
    }

    /// View over this query whose terminals return plain records
    pub fn plain(&mut self) -> PlainQuery<'_> {
        PlainQuery { query: self }
    }

    pub async fn find_all(&self) -> ModelResult<Vec<Instance>> {
        let records = self.model.load_records(&self.state).await?;
        Ok(records.into_iter().map(|r| self.model.hydrate(r)).collect())
    }

    pub async fn find_one(&self) -> ModelResult<Option<Instance>> {
        let record = self.model.load_first(&self.state).await?;
        Ok(record.map(|r| self.model.hydrate(r)))
    }

    pub async fn count(&self) -> ModelResult<u64> {
        self.model.load_count(&self.state).await
    }

    pub async fn exists(&self) -> ModelResult<bool> {
        self.model.load_exists(&self.state).await
    }

    pub async fn distinct(&self, field: &str) -> ModelResult<Vec<Value>> {
        self.model.load_distinct(&self.state, field).await
    }

    pub async fn paginate(&self, page: u64, per_page: u64) -> ModelResult<Page<Instance>> {
        let page = self.model.load_page(&self.state, page, per_page).await?;
        Ok(page.map(|r| self.model.hydrate(r)))
    }

    /// Condition for a write that selects `target` rows
    fn write_condition(&self, target: TrashFilter) -> ModelResult<Condition> {
        self.state.check_write(target)?;
        Ok(self.state.condition.clone())
    }

    fn policy(&self) -> &SoftDeletePolicy {
        self.model.definition().soft_delete()
    }

    pub async fn update(&self, data: Record) -> ModelResult<MutationOutcome> {
        self.update_with(data, WriteOptions::new()).await
    }

    pub async fn update_with(&self, data: Record, options: WriteOptions) -> ModelResult<MutationOutcome> {
        let condition = self.write_condition(TrashFilter::LiveOnly)?;
        self.model.update_with(condition, data, options).await
    }

    pub async fn delete(&self) -> ModelResult<MutationOutcome> {
        let condition = self.write_condition(self.policy().delete_filter())?;
        self.model.delete(condition).await
    }

    pub async fn force_delete(&self) -> ModelResult<u64> {
        let condition = self.write_condition(self.policy().force_delete_filter())?;
        self.model.force_delete(condition).await
    }

    pub async fn restore(&self) -> ModelResult<u64> {
        let condition = self.write_condition(self.policy().restore_filter())?;
        self.model.restore(condition).await
    }

    pub async fn increment(&self, field: &str, amount: impl Into<Value>) -> ModelResult<u64> {
        let condition = self.write_condition(TrashFilter::LiveOnly)?;
        self.model.increment(condition, field, amount).await
    }

    pub async fn decrement(&self, field: &str, amount: impl Into<Value>) -> ModelResult<u64> {
        let condition = self.write_condition(TrashFilter::LiveOnly)?;
        self.model.decrement(condition, field, amount).await
    }
}

/// Borrowed view of a [`ChainQuery`] returning records without virtuals
#[derive(Debug)]
pub struct PlainQuery<'a> {
    query: &'a mut ChainQuery,
}

impl PlainQuery<'_> {
    /// The underlying query; changes made through it stay visible here
    pub fn query(&mut self) -> &mut ChainQuery {
        self.query
    }

    pub async fn find_all(&self) -> ModelResult<Vec<Record>> {
        let model = &self.query.model;
        let records = model.load_records(&self.query.state).await?;
        Ok(records.into_iter().map(|r| model.present(r)).collect())
    }

    pub async fn find_one(&self) -> ModelResult<Option<Record>> {
        let model = &self.query.model;
        Ok(model.load_first(&self.query.state).await?.map(|r| model.present(r)))
    }

    pub async fn paginate(&self, page: u64, per_page: u64) -> ModelResult<Page<Record>> {
        let model = &self.query.model;
        let page = model.load_page(&self.query.state, page, per_page).await?;
        Ok(page.map(|r| model.present(r)))
    }
}
