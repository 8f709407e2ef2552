//! In-memory cache adapter with TTL expiry and a tag registry

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use service_builder::builder;

use super::{CacheAdapter, CacheResult, CacheStats};

/// Configuration for [`MemoryCache`]
#[derive(Debug, Clone)]
#[builder]
pub struct MemoryCacheConfig {
    /// Maximum number of live entries; `None` is unbounded
    #[builder(default = "Some(10_000)", getter)]
    pub max_entries: Option<usize>,

    /// TTL used when a caller passes a zero TTL
    #[builder(default = "Duration::from_secs(300)", getter)]
    pub default_ttl: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(10_000),
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl MemoryCacheConfigBuilder {
    pub fn max_entries_limit(self, max: usize) -> Self {
        self.max_entries(Some(max))
    }

    pub fn unlimited_entries(self) -> Self {
        self.max_entries(None)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local [`CacheAdapter`]
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    /// tag -> keys
    tags: DashMap<String, HashSet<String>>,
    config: MemoryCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            tags: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently registered under `tag`
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            total_keys: self.entries.len() as u64,
        }
    }

    pub fn flush(&self) {
        self.entries.clear();
        self.tags.clear();
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.untag(key, &entry.tags);
                true
            }
            None => false,
        }
    }

    fn untag(&self, key: &str, tags: &[String]) {
        for tag in tags {
            let emptied = match self.tags.get_mut(tag) {
                Some(mut keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if emptied {
                self.tags.remove_if(tag, |_, keys| keys.is_empty());
            }
        }
    }

    /// Drop expired entries, then the oldest ones while over capacity
    fn evict(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            self.remove_entry(&key);
        }

        let Some(max_entries) = self.config.max_entries else {
            return;
        };
        while self.entries.len() >= max_entries.max(1) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.remove_entry(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let cached = self.entries.get(key).map(|entry| (entry.is_expired(), entry.value.clone()));
        match cached {
            Some((false, value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Some((true, _)) => {
                self.remove_entry(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> CacheResult<()> {
        if !self.entries.contains_key(key) {
            self.evict();
        } else {
            self.remove_entry(key);
        }

        let ttl = if ttl.is_zero() { self.config.default_ttl } else { ttl };
        let now = Instant::now();
        for tag in tags {
            self.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn delete_by_tags(&self, tags: &[String]) -> CacheResult<usize> {
        let mut removed = 0;
        for tag in tags {
            let keys = self.tags.remove(tag).map(|(_, keys)| keys).unwrap_or_default();
            for key in keys {
                if self.remove_entry(&key) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = MemoryCache::default();
        cache.set("k", json!([1, 2]), Duration::from_secs(60), &[]).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!([1, 2])));
        assert_eq!(cache.get("missing").await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::default();
        cache.set("short", json!(1), Duration::from_millis(30), &[]).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_tags() {
        let cache = MemoryCache::default();
        let ttl = Duration::from_secs(60);
        cache.set("a", json!(1), ttl, &tags(&["model:users"])).await.unwrap();
        cache.set("b", json!(2), ttl, &tags(&["model:users", "model:teams"])).await.unwrap();
        cache.set("c", json!(3), ttl, &tags(&["model:teams"])).await.unwrap();

        assert_eq!(cache.delete_by_tags(&tags(&["model:users"])).await.unwrap(), 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(json!(3)));
        assert_eq!(cache.keys_for_tag("model:teams"), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let config = MemoryCacheConfigBuilder::new()
            .max_entries_limit(2)
            .build()
            .expect("Failed to build config");
        let cache = MemoryCache::new(config);
        let ttl = Duration::from_secs(60);

        cache.set("first", json!(1), ttl, &tags(&["t"])).await.unwrap();
        sleep(Duration::from_millis(2)).await;
        cache.set("second", json!(2), ttl, &tags(&["t"])).await.unwrap();
        sleep(Duration::from_millis(2)).await;
        cache.set("third", json!(3), ttl, &tags(&["t"])).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("first").await.unwrap(), None);
        assert!(!cache.keys_for_tag("t").contains(&"first".to_string()));
    }

    #[tokio::test]
    async fn test_overwrite_retags() {
        let cache = MemoryCache::default();
        let ttl = Duration::from_secs(60);
        cache.set("k", json!(1), ttl, &tags(&["old"])).await.unwrap();
        cache.set("k", json!(2), ttl, &tags(&["new"])).await.unwrap();
        assert!(cache.keys_for_tag("old").is_empty());
        assert_eq!(cache.delete_by_tags(&tags(&["new"])).await.unwrap(), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = MemoryCacheConfigBuilder::new().build().expect("Failed to build config");
        assert_eq!(*config.get_max_entries(), Some(10_000));
        assert_eq!(*config.get_default_ttl(), Duration::from_secs(300));
    }
}
