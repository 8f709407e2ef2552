//! Page-numbered results

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// One page of results with its position in the full set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    /// 1-based
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let total_pages = if per_page == 0 { 0 } else { total.div_ceil(per_page) };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

/// `(limit, skip)` of a 1-based page
pub fn page_window(page: u64, per_page: u64) -> ModelResult<(u64, u64)> {
    if page == 0 {
        return Err(ModelError::Query("Page numbers start at 1".to_string()));
    }
    if per_page == 0 {
        return Err(ModelError::Query("per_page must be greater than zero".to_string()));
    }
    Ok((per_page, (page - 1).saturating_mul(per_page)))
}
