//! Cache key derivation
//!
//! Keys have the shape
//! `model:<table>:<op>:<table>:<condition>:<fields>:<sort>:<skip>:<limit>:<trash>`.
//! Conditions and projections are canonicalized so equal queries built in a
//! different order share one key. Sort order is significant and kept as given.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::conditions::{Condition, SortSpec};
use crate::soft_delete::TrashFilter;

/// Tag carried by every cached entry of `table`
pub fn table_tag(table: &str) -> String {
    format!("model:{}", table)
}

/// Everything that identifies a cached read
#[derive(Debug, Clone, Copy)]
pub struct QueryKey<'a> {
    pub table: &'a str,
    /// `query`, `count`, `exists`, `distinct:<field>` or `paginate`
    pub operation: &'a str,
    pub condition: &'a Condition,
    pub fields: &'a [String],
    pub sort: &'a SortSpec,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub trash: TrashFilter,
}

impl<'a> QueryKey<'a> {
    /// Build the full key string
    pub fn render(&self) -> String {
        let mut fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        fields.sort_unstable();
        fields.dedup();
        let fields = if fields.is_empty() { "*".to_string() } else { fields.join(",") };

        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            table_tag(self.table),
            self.operation,
            self.table,
            self.condition.signature(),
            fields,
            self.sort.signature(),
            self.skip.unwrap_or(0),
            self.limit.map(|l| l.to_string()).unwrap_or_else(|| "all".to_string()),
            self.trash.signature(),
        )
    }

    /// Exact text of the raw parameters. Equal queries built in a different
    /// order may differ here; they still render to one key.
    fn raw_params(&self) -> String {
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
            self.table, self.operation, self.condition, self.fields, self.sort, self.skip, self.limit, self.trash
        )
    }
}

/// Bounded memo of rendered keys per model
pub struct KeyCache {
    entries: Mutex<LruCache<String, String>>,
}

impl KeyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rendered key for `query`, computed once per distinct parameter set
    pub fn key_for(&self, query: &QueryKey<'_>) -> String {
        let params = query.raw_params();
        let mut entries = self.entries.lock();
        if let Some(key) = entries.get(&params) {
            return key.clone();
        }
        let key = query.render();
        entries.put(params, key.clone());
        key
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
