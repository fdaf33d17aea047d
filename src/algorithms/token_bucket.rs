// src/algorithms/token_bucket.rs

use super::super::algorithms::{
    FailurePolicy, KeySpace, RateLimitAlgorithm, RateLimitStatus, DEFAULT_KEY_PREFIX,
};
use super::super::clock::{system_clock, SharedClock};
use super::super::config::TokenBucketConfig;
use super::super::error::{ensure_key, Result};
use super::super::storage::{StorageBackend, StoreScript};
use crate::admission_event;
use async_trait::async_trait;
use std::time::Duration;

/// Token Bucket rate limiting algorithm
///
/// The bucket holds at most `capacity` tokens and gains `refill_rate` tokens per
/// elapsed `interval`. Each admitted request consumes one token. Refill,
/// consumption and persistence run as one store-side script.
#[derive(Debug)]
pub struct TokenBucket<S>
where
    S: StorageBackend,
{
    storage: S,

    config: TokenBucketConfig,

    clock: SharedClock,

    failure_policy: FailurePolicy,

    keys: KeySpace,
}

impl<S> TokenBucket<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: TokenBucketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            clock: system_clock(),
            failure_policy: FailurePolicy::default(),
            keys: KeySpace::new(DEFAULT_KEY_PREFIX, "token_bucket"),
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
        self.keys = KeySpace::new(prefix, "token_bucket");
        self
    }

    /// Long enough for an empty bucket to refill completely, and never below
    /// two intervals.
    pub fn state_ttl(&self) -> Duration {
        let refills_to_full = self.config.capacity.div_ceil(self.config.refill_rate);
        let full = self.config.interval * refills_to_full.min(u32::MAX as u64) as u32;
        full.max(self.config.interval * 2)
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for TokenBucket<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    async fn try_check(&self, key: &str) -> Result<RateLimitStatus> {
        let bucket_key = self.keys.key(key);
        let args = [
            self.config.capacity.to_string(),
            self.config.refill_rate.to_string(),
            (self.config.interval.as_millis() as u64).max(1).to_string(),
            self.clock.now_millis().to_string(),
            (self.state_ttl().as_millis() as u64).to_string(),
        ];

        let left = self
            .storage
            .eval_script(StoreScript::TokenBucket, &[&bucket_key], &args)
            .await?;

        let allowed = left >= 0;
        let remaining = left.max(0) as u64;
        admission_event!(self.name(), key, allowed, remaining);
        Ok(RateLimitStatus::decided(allowed, remaining))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        ensure_key(key)?;
        self.storage.delete(&self.keys.key(key)).await?;
        Ok(())
    }
}
