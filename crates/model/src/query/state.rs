//! Mutable state behind a chain query

use crate::conditions::{Condition, SortSpec};
use crate::error::{ModelError, ModelResult};
use crate::soft_delete::TrashFilter;

/// Builder misuse held until the next terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    Configuration(String),
    Query(String),
}

impl PendingError {
    fn to_error(&self) -> ModelError {
        match self {
            PendingError::Configuration(message) => ModelError::Configuration(message.clone()),
            PendingError::Query(message) => ModelError::Query(message.clone()),
        }
    }
}

impl From<ModelError> for PendingError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Query(message) => PendingError::Query(message),
            ModelError::Configuration(message) => PendingError::Configuration(message),
            other => PendingError::Configuration(other.to_string()),
        }
    }
}

/// Condition, projection, ordering, window and trash flags of one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub condition: Condition,
    /// Projected fields; empty selects every column
    pub fields: Vec<String>,
    pub sort: SortSpec,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub include_trashed: bool,
    pub only_trashed: bool,
    pub pending_error: Option<PendingError>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    pub fn trash_filter(&self) -> TrashFilter {
        TrashFilter::from_flags(self.include_trashed, self.only_trashed)
    }

    /// Record a misuse; only the first one is kept
    pub fn fail(&mut self, error: impl Into<PendingError>) {
        if self.pending_error.is_none() {
            self.pending_error = Some(error.into());
        }
    }

    /// Error recorded by a builder method, if any
    pub fn check(&self) -> ModelResult<()> {
        match &self.pending_error {
            Some(pending) => Err(pending.to_error()),
            None => Ok(()),
        }
    }

    /// Check before a write that targets `target` rows. Window and ordering
    /// have no meaning for a bulk write, and a trash flag must agree with the
    /// rows the write already selects.
    pub fn check_write(&self, target: TrashFilter) -> ModelResult<()> {
        self.check()?;
        let mut unsupported = Vec::new();
        if self.limit.is_some() {
            unsupported.push("limit");
        }
        if self.skip.is_some() {
            unsupported.push("skip");
        }
        if !self.sort.is_empty() {
            unsupported.push("order_by");
        }
        let filter = self.trash_filter();
        if filter != TrashFilter::LiveOnly && filter != target {
            unsupported.push(match filter {
                TrashFilter::OnlyTrashed => "only_trashed",
                _ => "with_trashed",
            });
        }
        if unsupported.is_empty() {
            return Ok(());
        }
        Err(ModelError::Query(format!(
            "{} cannot be applied to a chain write",
            unsupported.join(", ")
        )))
    }
}
