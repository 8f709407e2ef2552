//! Read operations
//!
//! Every read is answered from the cache when one is attached, otherwise
//! from the store. Cached values are decoded records; `get` transforms and
//! virtuals are applied after the cache.

use serde_json::Value;

use super::{Instance, Model};
use crate::conditions::{Condition, IntoCondition};
use crate::error::ModelResult;
use crate::query::pagination::page_window;
use crate::query::sql;
use crate::query::{ChainQuery, Page, QueryState};
use crate::schema::Record;

impl Model {
    /// Chain query over every live row
    pub fn query(&self) -> ChainQuery {
        ChainQuery::new(self.clone(), QueryState::new())
    }

    /// Chain query starting from `condition`
    pub fn find(&self, condition: impl IntoCondition) -> ChainQuery {
        let mut query = self.query();
        query.where_condition(condition);
        query
    }

    /// Chain query starting from a named scope
    pub fn scope(&self, name: &str) -> ChainQuery {
        let mut query = self.query();
        query.scope(name);
        query
    }

    pub async fn find_all(&self, condition: impl IntoCondition) -> ModelResult<Vec<Instance>> {
        self.find(condition).find_all().await
    }

    pub async fn find_one(&self, condition: impl IntoCondition) -> ModelResult<Option<Instance>> {
        self.find(condition).find_one().await
    }

    pub async fn find_by_id(&self, id: impl Into<Value>) -> ModelResult<Option<Instance>> {
        self.find(Condition::by_key(id)).find_one().await
    }

    pub async fn count(&self, condition: impl IntoCondition) -> ModelResult<u64> {
        self.find(condition).count().await
    }

    pub async fn exists(&self, condition: impl IntoCondition) -> ModelResult<bool> {
        self.find(condition).exists().await
    }

    /// Distinct values of `field` among the matching rows
    pub async fn distinct(&self, field: &str, condition: impl IntoCondition) -> ModelResult<Vec<Value>> {
        self.find(condition).distinct(field).await
    }

    /// 1-based page of the matching rows
    pub async fn paginate(&self, condition: impl IntoCondition, page: u64, per_page: u64) -> ModelResult<Page<Instance>> {
        self.find(condition).paginate(page, per_page).await
    }

    pub(crate) async fn load_records(&self, state: &QueryState) -> ModelResult<Vec<Record>> {
        state.check()?;
        self.cached("query", state, async {
            let statement = sql::select(&self.compile_context(), self.table(), state)?;
            self.run_query(statement).await
        })
        .await
    }

    pub(crate) async fn load_first(&self, state: &QueryState) -> ModelResult<Option<Record>> {
        let mut first = state.clone();
        first.limit = Some(1);
        Ok(self.load_records(&first).await?.into_iter().next())
    }

    pub(crate) async fn load_count(&self, state: &QueryState) -> ModelResult<u64> {
        state.check()?;
        self.cached("count", state, self.fetch_count(state)).await
    }

    async fn fetch_count(&self, state: &QueryState) -> ModelResult<u64> {
        let statement = sql::count(&self.compile_context(), self.table(), state)?;
        let rows = self.run_query(statement).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|count| count.as_u64().or_else(|| count.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }

    pub(crate) async fn load_exists(&self, state: &QueryState) -> ModelResult<bool> {
        state.check()?;
        self.cached("exists", state, async {
            let statement = sql::exists(
                &self.compile_context(),
                self.table(),
                &state.condition,
                state.trash_filter(),
            )?;
            Ok(!self.run_query(statement).await?.is_empty())
        })
        .await
    }

    pub(crate) async fn load_distinct(&self, state: &QueryState, field: &str) -> ModelResult<Vec<Value>> {
        state.check()?;
        let operation = format!("distinct:{}", field);
        let records = self
            .cached(&operation, state, async {
                let statement = sql::distinct(&self.compile_context(), self.table(), field, state)?;
                self.run_query(statement).await
            })
            .await?;
        Ok(records
            .into_iter()
            .filter_map(|r| self.present(r).remove(field))
            .collect())
    }

    pub(crate) async fn load_page(&self, state: &QueryState, page: u64, per_page: u64) -> ModelResult<Page<Record>> {
        state.check()?;
        let (limit, skip) = page_window(page, per_page)?;
        let mut window = state.clone();
        window.limit = Some(limit);
        window.skip = Some(skip);

        self.cached("paginate", &window, async {
            let total = self.fetch_count(state).await?;
            let statement = sql::select(&self.compile_context(), self.table(), &window)?;
            let items = self.run_query(statement).await?;
            Ok(Page::new(items, total, page, per_page))
        })
        .await
    }
}
