// src/algorithms/mod.rs

pub mod debounce;
pub mod fixed_window;
pub mod metadata;
pub mod sliding_window;
pub mod throttle;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use debounce::Debounce;
pub use fixed_window::FixedWindow;
pub use metadata::{record_metadata, sweep_stale_metadata, RateLimitMetadata};
pub use sliding_window::SlidingWindow;
pub use throttle::Throttle;
pub use token_bucket::TokenBucket;

use super::error::{ensure_key, ErrorClass, GuardError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::warn;

/// Prefix every limiter puts in front of its storage keys by default
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request was admitted
    pub allowed: bool,

    /// Further requests that would be admitted right now; 0 when unknown
    pub remaining: u64,

    /// The decision came from the failure policy because the store failed
    pub degraded: bool,
}

impl RateLimitStatus {
    pub fn decided(allowed: bool, remaining: u64) -> Self {
        Self {
            allowed,
            remaining,
            degraded: false,
        }
    }

    fn degraded(allowed: bool) -> Self {
        Self {
            allowed,
            remaining: 0,
            degraded: true,
        }
    }
}

/// What a limiter does when the store fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Admit,
    Deny,
    Propagate,
}

/// Maps store error classes to a [`FailureAction`].
///
/// Only store errors are ever mapped; `InvalidArgument` and every other class
/// always propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub on_unavailable: FailureAction,
    pub on_protocol_error: FailureAction,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::fail_open()
    }
}

impl FailurePolicy {
    pub fn fail_open() -> Self {
        Self {
            on_unavailable: FailureAction::Admit,
            on_protocol_error: FailureAction::Admit,
        }
    }

    pub fn fail_closed() -> Self {
        Self {
            on_unavailable: FailureAction::Deny,
            on_protocol_error: FailureAction::Deny,
        }
    }

    pub fn propagate() -> Self {
        Self {
            on_unavailable: FailureAction::Propagate,
            on_protocol_error: FailureAction::Propagate,
        }
    }

    pub fn action_for(&self, err: &GuardError) -> FailureAction {
        match err.class() {
            ErrorClass::StoreUnavailable => self.on_unavailable,
            ErrorClass::StoreProtocol => self.on_protocol_error,
            _ => FailureAction::Propagate,
        }
    }

    fn resolve(&self, algorithm: &str, key: &str, err: GuardError) -> Result<RateLimitStatus> {
        match self.action_for(&err) {
            FailureAction::Admit => {
                warn!(algorithm, key, error = %err, "Store error, failing open");
                Ok(RateLimitStatus::degraded(true))
            }
            FailureAction::Deny => {
                warn!(algorithm, key, error = %err, "Store error, failing closed");
                Ok(RateLimitStatus::degraded(false))
            }
            FailureAction::Propagate => Err(err),
        }
    }
}

/// Core trait that all admission-control algorithms implement
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Short name used in storage keys and logs
    fn name(&self) -> &'static str;

    fn failure_policy(&self) -> &FailurePolicy;

    /// Decides and records one request. Store errors are returned unchanged.
    async fn try_check(&self, key: &str) -> Result<RateLimitStatus>;

    /// Deletes the stored state for `key`
    async fn reset(&self, key: &str) -> Result<()>;

    /// Decides one request, applying the failure policy to store errors
    async fn check(&self, key: &str) -> Result<RateLimitStatus> {
        ensure_key(key)?;
        match self.try_check(key).await {
            Ok(status) => Ok(status),
            Err(err) => self.failure_policy().resolve(self.name(), key, err),
        }
    }

    async fn allow(&self, key: &str) -> Result<bool> {
        Ok(self.check(key).await?.allowed)
    }
}

/// Conventional caller key: `{algorithm}:{subject}:{endpoint}`
pub fn rate_limit_key(algorithm: &str, subject: &str, endpoint: &str) -> String {
    format!("{}:{}:{}", algorithm, subject, endpoint)
}

/// Maps caller keys to storage keys under `{prefix}:{algorithm}:`
#[derive(Debug, Clone)]
pub(crate) struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub(crate) fn new(prefix: &str, algorithm: &str) -> Self {
        Self {
            prefix: format!("{}:{}:", prefix, algorithm),
        }
    }

    pub(crate) fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}
