// src/algorithms/throttle.rs

use super::super::algorithms::{
    FailurePolicy, KeySpace, RateLimitAlgorithm, RateLimitStatus, DEFAULT_KEY_PREFIX,
};
use super::super::clock::{system_clock, SharedClock};
use super::super::config::ThrottleConfig;
use super::super::error::{ensure_key, Result};
use super::super::storage::StorageBackend;
use crate::admission_event;
use async_trait::async_trait;

/// At most one admission per `interval`, measured from the last admission.
///
/// A single `SET NX PX` decides: the caller that creates the marker is
/// admitted, everyone else is refused until it expires.
#[derive(Debug)]
pub struct Throttle<S>
where
    S: StorageBackend,
{
    storage: S,
    config: ThrottleConfig,
    clock: SharedClock,
    failure_policy: FailurePolicy,
    keys: KeySpace,
}

impl<S> Throttle<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: ThrottleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            clock: system_clock(),
            failure_policy: FailurePolicy::default(),
            keys: KeySpace::new(DEFAULT_KEY_PREFIX, "throttle"),
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
        self.keys = KeySpace::new(prefix, "throttle");
        self
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for Throttle<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    async fn try_check(&self, key: &str) -> Result<RateLimitStatus> {
        let marker = self.keys.key(key);
        let now = self.clock.now_millis().to_string();

        let allowed = self
            .storage
            .set_if_absent(&marker, now.as_bytes(), Some(self.config.interval))
            .await?;

        admission_event!(self.name(), key, allowed, 0u64);
        Ok(RateLimitStatus::decided(allowed, 0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        ensure_key(key)?;
        self.storage.delete(&self.keys.key(key)).await?;
        Ok(())
    }
}
