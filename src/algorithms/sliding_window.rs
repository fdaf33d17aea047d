// src/algorithms/sliding_window.rs

use super::super::algorithms::{
    FailurePolicy, KeySpace, RateLimitAlgorithm, RateLimitStatus, DEFAULT_KEY_PREFIX,
};
use super::super::clock::{system_clock, SharedClock};
use super::super::config::SlidingWindowConfig;
use super::super::error::{ensure_key, Result};
use super::super::storage::{ttl_millis, StorageBackend, StoreScript};
use crate::admission_event;
use async_trait::async_trait;
use uuid::Uuid;

/// Sliding Window log algorithm
///
/// Every admitted request leaves a `"{now}-{uuid}"` member scored `now` (ms) in
/// a sorted set. One [`StoreScript::SlidingWindow`] call trims members older
/// than the window, adds the new one, reads the cardinality and refreshes the
/// TTL. A denied request's member is removed inside the same script, so the
/// set only ever holds admitted requests and the key frees up `window` after
/// its oldest admission.
#[derive(Debug)]
pub struct SlidingWindow<S>
where
    S: StorageBackend,
{
    storage: S,

    config: SlidingWindowConfig,

    clock: SharedClock,

    failure_policy: FailurePolicy,

    keys: KeySpace,
}

impl<S> SlidingWindow<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: SlidingWindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            clock: system_clock(),
            failure_policy: FailurePolicy::default(),
            keys: KeySpace::new(DEFAULT_KEY_PREFIX, "sliding_window"),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.keys = KeySpace::new(prefix, "sliding_window");
        self
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for SlidingWindow<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    async fn try_check(&self, key: &str) -> Result<RateLimitStatus> {
        let set_key = self.keys.key(key);
        let now = self.clock.now_millis();
        let cutoff = now - self.config.window.as_millis() as i64;
        let member = format!("{}-{}", now, Uuid::new_v4().simple());

        let args = [
            cutoff.to_string(),
            now.to_string(),
            member,
            self.config.limit.to_string(),
            ttl_millis(self.config.window).to_string(),
        ];
        let count = self
            .storage
            .eval_script(StoreScript::SlidingWindow, &[set_key.as_str()], &args)
            .await?
            .max(0) as u64;

        let allowed = count <= self.config.limit;
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
