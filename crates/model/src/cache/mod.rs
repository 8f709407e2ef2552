//! Query result caching
//!
//! Models with an attached [`CacheAdapter`] cache every successful read under
//! a deterministic key (see [`key`]) tagged `model:<table>`. Every mutation
//! drops all entries carrying that tag.

pub mod key;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use key::{table_tag, KeyCache, QueryKey};
pub use memory::{MemoryCache, MemoryCacheConfig, MemoryCacheConfigBuilder};

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache backend consumed by models
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Fetch a live entry
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store an entry for `ttl`, registering it under every tag
    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> CacheResult<()>;

    /// Remove every entry registered under any of `tags`; returns how many
    /// entries were removed
    async fn delete_by_tags(&self, tags: &[String]) -> CacheResult<usize>;
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_keys: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
