// src/algorithms/fixed_window.rs

use super::super::algorithms::{
    FailurePolicy, KeySpace, RateLimitAlgorithm, RateLimitStatus, DEFAULT_KEY_PREFIX,
};
use super::super::config::FixedWindowConfig;
use super::super::error::{ensure_key, GuardError, Result};
use super::super::storage::{KeyTtl, StorageBackend};
use crate::admission_event;
use async_trait::async_trait;
use tracing::{error, warn};

/// Fixed Window rate limiting algorithm
///
/// One counter per key. The first increment of a window arms a TTL of one
/// window; the counter disappears with it and the next request starts a new
/// window. A request is admitted while the post-increment count is within
/// `limit`.
#[derive(Debug)]
pub struct FixedWindow<S>
where
    S: StorageBackend,
{
    /// Storage backend holding the counters
    storage: S,

    config: FixedWindowConfig,

    failure_policy: FailurePolicy,

    keys: KeySpace,
}

impl<S> FixedWindow<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: FixedWindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            failure_policy: FailurePolicy::default(),
            keys: KeySpace::new(DEFAULT_KEY_PREFIX, "fixed_window"),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.keys = KeySpace::new(prefix, "fixed_window");
        self
    }

    /// The counter exists but its TTL could not be set. Without repair it
    /// would never expire and the key would stay limited forever.
    async fn repair_unarmed_counter(&self, counter_key: &str, cause: GuardError) -> GuardError {
        error!(
            key = counter_key,
            inconsistency = "counter_without_ttl",
            error = %cause,
            "Counter incremented but TTL was not set, deleting it"
        );
        if let Err(err) = self.storage.delete(counter_key).await {
            error!(key = counter_key, error = %err, "Failed to delete unarmed counter");
        }
        cause
    }

    /// Re-arms a counter that was left without a TTL by an earlier failure
    async fn rearm_if_persistent(&self, counter_key: &str) {
        if let Ok(KeyTtl::Persistent) = self.storage.ttl(counter_key).await {
            warn!(key = counter_key, "Found counter without TTL, re-arming");
            if let Err(err) = self.storage.expire(counter_key, self.config.window).await {
                warn!(key = counter_key, error = %err, "Failed to re-arm counter");
            }
        }
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for FixedWindow<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    async fn try_check(&self, key: &str) -> Result<RateLimitStatus> {
        let counter_key = self.keys.key(key);
        let count = self.storage.increment(&counter_key, 1).await?.max(0) as u64;

        if count == 1 {
            if let Err(err) = self.storage.expire(&counter_key, self.config.window).await {
                return Err(self.repair_unarmed_counter(&counter_key, err).await);
            }
        }

        let allowed = count <= self.config.limit;
        if !allowed {
            self.rearm_if_persistent(&counter_key).await;
        }

        let remaining = self.config.limit.saturating_sub(count);
        admission_event!(self.name(), key, allowed, remaining);
        Ok(RateLimitStatus::decided(allowed, remaining))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        ensure_key(key)?;
        self.storage.delete(&self.keys.key(key)).await?;
        Ok(())
    }
}
