// src/cache_aside.rs

//! Read-through caching of computed values with stampede protection.
//!
//! Values are stored as JSON under `{prefix}{key}`. Each value has a stale
//! copy under `stale:{prefix}{key}`, outliving the value by `stale_ttl`; it is
//! only read when a recomputation fails. The two keyspaces never overlap, so
//! no caller key can reach another key's stale copy.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::CacheAsideConfig;
use crate::error::{ensure_key, GuardError, Result};
use crate::lock::DistributedLock;
use crate::storage::{StorageBackend, StoragePipeline};

pub const DEFAULT_CACHE_PREFIX: &str = "cache:";

const STALE_NAMESPACE: &str = "stale:";

type BoxError = Box<dyn StdError + Send + Sync>;

/// Get-or-compute helper over any storage backend.
///
/// On a miss only the caller holding the per-key [`DistributedLock`] computes;
/// the others poll for its result until the lock timeout, then compute on their
/// own without writing.
#[derive(Debug, Clone)]
pub struct CacheAside<S>
where
    S: StorageBackend + Clone + 'static,
{
    storage: S,
    config: CacheAsideConfig,
    prefix: String,
}

impl<S> CacheAside<S>
where
    S: StorageBackend + Clone + 'static,
{
    pub fn new(storage: S, config: CacheAsideConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            prefix: DEFAULT_CACHE_PREFIX.to_string(),
        })
    }

    /// Replaces the value key prefix.
    ///
    /// Rejects prefixes that would let value keys and stale keys collide,
    /// i.e. an empty prefix or one that `stale:{prefix}` itself starts with.
    pub fn with_key_prefix(mut self, prefix: &str) -> Result<Self> {
        let stale_prefix = format!("{}{}", STALE_NAMESPACE, prefix);
        if prefix.is_empty() || stale_prefix.starts_with(prefix) {
            return Err(GuardError::invalid(format!(
                "cache key prefix {:?} overlaps the stale keyspace",
                prefix
            )));
        }
        self.prefix = prefix.to_string();
        Ok(self)
    }

    fn value_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn stale_key(&self, key: &str) -> String {
        format!("{}{}{}", STALE_NAMESPACE, self.prefix, key)
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// The value is stored for `ttl` plus a random jitter of up to
    /// `max_jitter`. When `compute` fails, a stale copy is returned if one
    /// exists and `stale_ttl` is non-zero; otherwise the failure surfaces as
    /// [`GuardError::Compute`].
    pub async fn get_or_set<T, F, Fut, E>(&self, key: &str, compute: F, ttl: Duration) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        ensure_key(key)?;
        if ttl.is_zero() {
            return Err(GuardError::invalid("ttl must be positive"));
        }

        if let Some(value) = self.read::<T>(&self.value_key(key)).await {
            debug!(key, "Cache hit");
            self.maybe_refresh(key, compute, ttl);
            return Ok(value);
        }
        debug!(key, "Cache miss");

        let lock = DistributedLock::new(
            self.storage.clone(),
            &self.value_key(key),
            self.config.lock.clone(),
        )?;

        match lock.acquire().await {
            Ok(true) => {
                let result = self.compute_as_winner(key, &compute, ttl).await;
                if let Err(err) = lock.release().await {
                    warn!(key, error = %err, "Failed to release recompute lock");
                }
                match result {
                    Ok(value) => Ok(value),
                    Err(err) => self.stale_or(key, err).await,
                }
            }
            Ok(false) => {
                if let Some(value) = self.wait_for_winner::<T>(key).await {
                    return Ok(value);
                }
                debug!(key, "Recompute still running elsewhere, computing directly");
                match run(&compute).await {
                    Ok(value) => Ok(value),
                    Err(err) => self.stale_or(key, err).await,
                }
            }
            Err(err) => {
                warn!(key, error = %err, "Could not take recompute lock, computing directly");
                match run(&compute).await {
                    Ok(value) => Ok(value),
                    Err(err) => self.stale_or(key, err).await,
                }
            }
        }
    }

    async fn compute_as_winner<T, F, Fut, E>(&self, key: &str, compute: &F, ttl: Duration) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        // Someone may have finished between our miss and our acquire
        if let Some(value) = self.read::<T>(&self.value_key(key)).await {
            return Ok(value);
        }

        let value = run(compute).await?;
        let stored = match serde_json::to_vec(&value) {
            Ok(payload) => self.store(key, &payload, ttl).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = stored {
            warn!(key, error = %err, "Failed to store computed value");
        }
        Ok(value)
    }

    /// Polls for the lock winner's value until the lock timeout, or the lock
    /// TTL when no timeout is set
    async fn wait_for_winner<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let patience = self.config.lock.timeout.unwrap_or(self.config.lock.ttl);
        let deadline = Instant::now() + patience;
        let value_key = self.value_key(key);
        while Instant::now() < deadline {
            time::sleep(self.config.lock.poll_interval).await;
            if let Some(value) = self.read::<T>(&value_key).await {
                return Some(value);
            }
        }
        None
    }

    async fn stale_or<T: DeserializeOwned>(&self, key: &str, err: GuardError) -> Result<T> {
        if !self.config.stale_ttl.is_zero() {
            if let Some(value) = self.read::<T>(&self.stale_key(key)).await {
                warn!(key, error = %err, "Compute failed, serving stale value");
                return Ok(value);
            }
        }
        Err(err)
    }

    /// Reads and decodes a value; store errors and undecodable payloads are misses
    async fn read<T: DeserializeOwned>(&self, storage_key: &str) -> Option<T> {
        let raw = match self.storage.get(storage_key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key = storage_key, error = %err, "Cache lookup failed");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = storage_key, error = %err, "Cached value could not be decoded");
                None
            }
        }
    }

    fn queue_value(&self, pipeline: &mut S::Pipeline, key: &str, payload: &[u8], ttl: Duration) {
        let lifetime = ttl.saturating_add(self.jitter());
        pipeline.set(&self.value_key(key), payload, Some(lifetime));
        if !self.config.stale_ttl.is_zero() {
            pipeline.set(
                &self.stale_key(key),
                payload,
                Some(lifetime.saturating_add(self.config.stale_ttl)),
            );
        }
    }

    async fn store(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<()> {
        let mut pipeline = self.storage.pipeline();
        self.queue_value(&mut pipeline, key, payload, ttl);
        self.storage.execute_pipeline(pipeline).await?;
        Ok(())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as f64;
        Duration::from_millis((rand::random::<f64>() * max_ms) as u64)
    }

    fn maybe_refresh<T, F, Fut, E>(&self, key: &str, compute: F, ttl: Duration)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let probability = self.config.refresh_probability;
        if probability <= 0.0 || rand::random::<f64>() >= probability {
            return;
        }

        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let refreshed = match run(&compute).await {
                Ok(value) => match serde_json::to_vec(&value) {
                    Ok(payload) => this.store(&key, &payload, ttl).await,
                    Err(err) => Err(err.into()),
                },
                Err(err) => Err(err),
            };
            match refreshed {
                Ok(()) => debug!(key = %key, "Background refresh stored a new value"),
                Err(err) => warn!(key = %key, error = %err, "Background refresh failed"),
            }
        });
    }

    /// Deletes the value and its stale copy. Returns whether anything existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        let removed = self
            .storage
            .delete_many(&[self.value_key(key), self.stale_key(key)])
            .await?;
        debug!(key, removed, "Invalidated cache entry");
        Ok(removed > 0)
    }

    /// Loads `keys` through `loader` and stores the results, `batch_size`
    /// values per pipeline. Keys the loader returns `None` for, or fails on,
    /// are skipped. Returns how many values were stored.
    pub async fn warm<T, L, Fut, E>(&self, keys: &[String], loader: L, ttl: Duration) -> Result<u64>
    where
        T: Serialize,
        L: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        if ttl.is_zero() {
            return Err(GuardError::invalid("ttl must be positive"));
        }

        let mut stored = 0u64;
        for batch in keys.chunks(self.config.batch_size) {
            let mut pipeline = self.storage.pipeline();
            let mut batched = 0u64;

            for key in batch {
                if key.is_empty() {
                    warn!("Skipping empty key while warming");
                    continue;
                }
                match loader(key.clone()).await {
                    Ok(Some(value)) => {
                        let payload = serde_json::to_vec(&value)?;
                        self.queue_value(&mut pipeline, key, &payload, ttl);
                        batched += 1;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let err: BoxError = err.into();
                        warn!(key = %key, error = %err, "Loader failed while warming");
                    }
                }
            }

            if !pipeline.is_empty() {
                self.storage.execute_pipeline(pipeline).await?;
                stored += batched;
            }
        }

        info!(requested = keys.len(), stored, "Cache warmed");
        Ok(stored)
    }
}

async fn run<T, F, Fut, E>(compute: &F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<BoxError>,
{
    compute().await.map_err(|err| GuardError::Compute(err.into()))
}
