// src/resilience/exponential_backoff.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_serde;

/// Configuration for retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of tries, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Factor applied to the delay after each retry; 1.0 gives a constant delay
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in 50%..100%
    #[serde(default)]
    pub use_jitter: bool,
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_multiplier(),
            use_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Same delay before every retry
    pub fn constant(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }
}

/// Yields the delays between consecutive attempts.
///
/// With `max_attempts = n` there are at most `n - 1` delays:
/// `initial, initial * m, initial * m², ...`, each capped at `max_backoff`.
#[derive(Debug)]
pub struct ExponentialBackoff {
    retries: usize,
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { retries: 0, config }
    }

    /// Delay before the next attempt, or None once every attempt is used up
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.max_attempts {
            return None;
        }

        let exp = self.retries as i32;
        self.retries += 1;

        let base_ns = self.config.initial_backoff.as_nanos() as f64;
        let backoff_ns = base_ns * self.config.backoff_multiplier.powi(exp);
        let capped_ns = backoff_ns.min(self.config.max_backoff.as_nanos() as f64);

        let delay_ns = if self.config.use_jitter {
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            capped_ns * jitter
        } else {
            capped_ns
        };

        Some(Duration::from_nanos(delay_ns.round() as u64))
    }

    /// Number of delays handed out so far
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
