// src/cache/lfu.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{read_or_miss, CacheKeys, CachePolicy};
use crate::config::CacheConfig;
use crate::error::{ensure_key, Result};
use crate::storage::StorageBackend;

const NAME: &str = "lfu";

/// Least Frequently Used cache.
///
/// Bookkeeping is two sorted sets: `{namespace}#freq` scores each key by its
/// access count and `{namespace}#clock` by the logical tick of its last touch.
/// The tick comes from the counter `{namespace}#tick`, so every process
/// sharing the namespace orders touches the same way. The victim is the
/// lowest frequency, ties going to the oldest tick.
#[derive(Debug)]
pub struct LfuCache<S>
where
    S: StorageBackend,
{
    storage: S,
    config: CacheConfig,
    keys: CacheKeys,
    freq_key: String,
    clock_key: String,
    tick_key: String,
}

impl<S> LfuCache<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let keys = CacheKeys::new(&config.namespace);
        Ok(Self {
            storage,
            freq_key: keys.meta("freq"),
            clock_key: keys.meta("clock"),
            tick_key: keys.meta("tick"),
            config,
            keys,
        })
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Access count of a tracked key
    pub async fn frequency(&self, key: &str) -> Result<Option<u64>> {
        ensure_key(key)?;
        let scores = self
            .storage
            .zrange_by_score(&self.freq_key, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        Ok(scores
            .into_iter()
            .find(|(member, _)| member == key)
            .map(|(_, score)| score as u64))
    }

    async fn stamp(&self, key: &str) -> Result<()> {
        let tick = self.storage.increment(&self.tick_key, 1).await?;
        self.storage.zadd(&self.clock_key, key, tick as f64).await
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let tracked = self.storage.zrem(&self.freq_key, key).await?;
        self.storage.zrem(&self.clock_key, key).await?;
        Ok(tracked)
    }

    async fn pick_victim(&self) -> Result<Option<String>> {
        let by_frequency = self
            .storage
            .zrange_by_score(&self.freq_key, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        let Some((_, lowest)) = by_frequency.first() else {
            return Ok(None);
        };
        let lowest = *lowest;
        let candidates: Vec<String> = by_frequency
            .into_iter()
            .take_while(|(_, score)| *score == lowest)
            .map(|(member, _)| member)
            .collect();
        if candidates.len() == 1 {
            return Ok(candidates.into_iter().next());
        }

        let ticks: HashMap<String, f64> = self
            .storage
            .zrange_by_score(&self.clock_key, f64::NEG_INFINITY, f64::INFINITY)
            .await?
            .into_iter()
            .collect();

        // Keys missing from the clock set sort first
        Ok(candidates.into_iter().min_by(|a, b| {
            let ta = ticks.get(a).copied().unwrap_or(f64::NEG_INFINITY);
            let tb = ticks.get(b).copied().unwrap_or(f64::NEG_INFINITY);
            ta.total_cmp(&tb)
        }))
    }

    async fn evict_one(&self) -> Result<Option<String>> {
        let Some(victim) = self.pick_victim().await? else {
            return Ok(None);
        };
        self.forget(&victim).await?;
        self.storage.delete(&self.keys.value(&victim)).await?;
        debug!(
            policy = NAME,
            namespace = self.keys.namespace(),
            key = %victim,
            "Evicted cache entry"
        );
        Ok(Some(victim))
    }
}

#[async_trait]
impl<S> CachePolicy for LfuCache<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        ensure_key(key)?;
        let value = read_or_miss(self.storage.get(&self.keys.value(key)).await, NAME, key)?;

        if value.is_some() {
            let touched = async {
                self.storage.zincr(&self.freq_key, key, 1.0).await?;
                self.stamp(key).await
            };
            if let Err(err) = touched.await {
                warn!(policy = NAME, key, error = %err, "Failed to update access frequency");
            }
        } else if let Err(err) = self.forget(key).await {
            debug!(policy = NAME, key, error = %err, "Failed to drop stale frequency entry");
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<Option<String>> {
        ensure_key(key)?;
        let value_key = self.keys.value(key);
        let ttl = ttl.or(self.config.default_ttl);

        if self.storage.exists(&value_key).await? {
            self.storage.zincr(&self.freq_key, key, 1.0).await?;
            self.stamp(key).await?;
            self.storage.set(&value_key, value, ttl).await?;
            return Ok(None);
        }

        // An expired value still holding a slot is replaced in place
        let tracked = self.forget(key).await?;
        let mut evicted = None;
        if !tracked && self.storage.zcard(&self.freq_key).await? >= self.config.capacity as u64 {
            evicted = self.evict_one().await?;
        }

        self.storage.zadd(&self.freq_key, key, 1.0).await?;
        self.stamp(key).await?;
        self.storage.set(&value_key, value, ttl).await?;
        Ok(evicted)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        let existed = self.storage.delete(&self.keys.value(key)).await?;
        self.forget(key).await?;
        Ok(existed)
    }

    async fn clear(&self) -> Result<u64> {
        let values = self.storage.scan_prefix(&self.keys.value_prefix()).await?;
        let removed = self.storage.delete_many(&values).await?;
        self.storage
            .delete_many(&[
                self.freq_key.clone(),
                self.clock_key.clone(),
                self.tick_key.clone(),
            ])
            .await?;
        debug!(policy = NAME, namespace = self.keys.namespace(), removed, "Cleared cache");
        Ok(removed)
    }

    async fn len(&self) -> Result<u64> {
        self.storage.zcard(&self.freq_key).await
    }

    /// Lowest frequency first
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .zrange_by_score(&self.freq_key, f64::NEG_INFINITY, f64::INFINITY)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }
}
