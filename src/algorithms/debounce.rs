// src/algorithms/debounce.rs

use super::super::algorithms::{
    FailurePolicy, KeySpace, RateLimitAlgorithm, RateLimitStatus, DEFAULT_KEY_PREFIX,
};
use super::super::clock::{system_clock, SharedClock};
use super::super::config::DebounceConfig;
use super::super::error::{ensure_key, Result};
use super::super::storage::{KeyTtl, StorageBackend};
use crate::admission_event;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Suppresses calls while a marker from an earlier admission is alive.
///
/// With `rearm_on_suppressed` every suppressed call pushes the marker's expiry
/// back, so the gate reopens only after `interval` of quiet.
///
/// The TTL read and the marker write are two round trips. Two callers that
/// both see no marker are both admitted; use [`Throttle`](super::Throttle)
/// when that matters.
#[derive(Debug)]
pub struct Debounce<S>
where
    S: StorageBackend,
{
    storage: S,
    config: DebounceConfig,
    clock: SharedClock,
    failure_policy: FailurePolicy,
    keys: KeySpace,
}

impl<S> Debounce<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, config: DebounceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            clock: system_clock(),
            failure_policy: FailurePolicy::default(),
            keys: KeySpace::new(DEFAULT_KEY_PREFIX, "debounce"),
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
        self.keys = KeySpace::new(prefix, "debounce");
        self
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for Debounce<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "debounce"
    }

    fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    async fn try_check(&self, key: &str) -> Result<RateLimitStatus> {
        let marker = self.keys.key(key);

        let ttl = self.storage.ttl(&marker).await?;
        if ttl.is_alive() {
            // A failed re-arm still denies
            if self.config.rearm_on_suppressed {
                if let Err(err) = self.storage.expire(&marker, self.config.interval).await {
                    warn!(key = %marker, error = %err, "Failed to re-arm debounce marker");
                }
            }
            admission_event!(self.name(), key, false, 0u64);
            return Ok(RateLimitStatus::decided(false, 0));
        }

        if ttl == KeyTtl::Persistent {
            debug!(key = %marker, "Replacing debounce marker without TTL");
        }

        let now = self.clock.now_millis().to_string();
        self.storage
            .set(&marker, now.as_bytes(), Some(self.config.interval))
            .await?;

        admission_event!(self.name(), key, true, 0u64);
        Ok(RateLimitStatus::decided(true, 0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        ensure_key(key)?;
        self.storage.delete(&self.keys.key(key)).await?;
        Ok(())
    }
}
