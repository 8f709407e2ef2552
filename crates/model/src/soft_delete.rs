//! Soft delete
//!
//! A row is live while its marker column is NULL and trashed once the marker
//! holds a deletion timestamp. `delete` tombstones live rows, `restore` clears
//! the marker of trashed rows and `force_delete` purges either. Reads and
//! writes pick the rows they see through [`TrashFilter`].

use crate::dialect::SqlDialect;

/// Which rows a read or write may see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrashFilter {
    /// Live rows only
    #[default]
    LiveOnly,
    /// Live and trashed rows
    WithTrashed,
    /// Trashed rows only
    OnlyTrashed,
}

impl TrashFilter {
    /// Resolve the two builder flags. `only_trashed` wins when both are set.
    pub fn from_flags(include_trashed: bool, only_trashed: bool) -> Self {
        if only_trashed {
            TrashFilter::OnlyTrashed
        } else if include_trashed {
            TrashFilter::WithTrashed
        } else {
            TrashFilter::LiveOnly
        }
    }

    /// Marker predicate for this filter, if any. `column` must already be quoted.
    pub fn predicate(&self, column: &str) -> Option<String> {
        match self {
            TrashFilter::LiveOnly => Some(format!("{} IS NULL", column)),
            TrashFilter::OnlyTrashed => Some(format!("{} IS NOT NULL", column)),
            TrashFilter::WithTrashed => None,
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            TrashFilter::LiveOnly => "live",
            TrashFilter::WithTrashed => "with",
            TrashFilter::OnlyTrashed => "only",
        }
    }
}

/// How a delete reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// `UPDATE .. SET marker = now`
    Tombstone,
    /// `DELETE FROM ..`
    Purge,
}

/// Per-model soft-delete settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeletePolicy {
    pub enabled: bool,
    pub column: String,
}

impl SoftDeletePolicy {
    pub fn new(enabled: bool, column: impl Into<String>) -> Self {
        Self {
            enabled,
            column: column.into(),
        }
    }

    /// Marker column when enabled
    pub fn marker(&self) -> Option<&str> {
        self.enabled.then_some(self.column.as_str())
    }

    pub fn delete_mode(&self) -> DeleteMode {
        if self.enabled {
            DeleteMode::Tombstone
        } else {
            DeleteMode::Purge
        }
    }

    /// Filter applied to the WHERE of a normal `delete()`, which must not
    /// touch already trashed rows.
    pub fn delete_filter(&self) -> TrashFilter {
        TrashFilter::LiveOnly
    }

    /// Filter applied to `restore()`
    pub fn restore_filter(&self) -> TrashFilter {
        TrashFilter::OnlyTrashed
    }

    /// Filter applied to `force_delete()`
    pub fn force_delete_filter(&self) -> TrashFilter {
        TrashFilter::WithTrashed
    }

    /// Quoted marker predicate for a filter, `None` when disabled
    pub fn predicate(&self, filter: TrashFilter, dialect: SqlDialect) -> Option<String> {
        self.marker()
            .and_then(|column| filter.predicate(&dialect.quote_identifier(column)))
    }
}
