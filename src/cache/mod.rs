// src/cache/mod.rs

//! Bounded caches whose values and eviction bookkeeping both live in the store.
//!
//! Every policy keeps values under `{namespace}:{key}` and its bookkeeping
//! under `{namespace}#...`, so `clear` can find values with one prefix scan.
//!
//! Capacity is enforced by the cache itself: the `set` that would overflow
//! deletes exactly one victim value before writing. The population check and
//! the eviction are separate round trips, so the bound is exact only with a
//! single writer per namespace. Concurrent writers can overshoot by the number
//! of racing `set` calls until later inserts evict again.

mod lfu;
mod ordered;

#[cfg(test)]
mod tests;

pub use lfu::LfuCache;
pub use ordered::{
    Discipline, EvictFrom, Fifo, FifoCache, Lifo, LifoCache, Lru, LruCache, Mru, MruCache,
    OrderedCache,
};

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Uniform surface of the eviction-policy caches
#[async_trait]
pub trait CachePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the value, or `None` on a miss.
    ///
    /// Store errors are reported as misses; only an invalid key is an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores a value, evicting one entry when the cache is full.
    ///
    /// `ttl` falls back to the configured default. Returns the evicted key.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<Option<String>>;

    /// Removes the value and its bookkeeping. Returns whether a value existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every value and all bookkeeping for the namespace.
    async fn clear(&self) -> Result<u64>;

    /// Number of tracked entries
    async fn len(&self) -> Result<u64>;

    /// Tracked keys, next eviction candidate first for FIFO/LRU/LFU
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Key layout for one cache namespace
#[derive(Debug, Clone)]
pub(crate) struct CacheKeys {
    namespace: String,
}

impl CacheKeys {
    pub(crate) fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn value(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Prefix shared by every value key
    pub(crate) fn value_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    pub(crate) fn meta(&self, name: &str) -> String {
        format!("{}#{}", self.namespace, name)
    }
}

/// Turns a store failure on a read into a miss
pub(crate) fn read_or_miss<T>(
    result: Result<Option<T>>,
    policy: &'static str,
    key: &str,
) -> Result<Option<T>> {
    match result {
        Err(err) if err.is_store_error() => {
            warn!(policy, key, error = %err, "Cache read failed, treating as miss");
            Ok(None)
        }
        other => other,
    }
}
