// src/resilience/circuit_breaker.rs

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::duration_serde;

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// The store is considered down; requests are rejected without a round trip
    Open,
    /// Probing: requests are let through and the outcome decides the next state
    HalfOpen,
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// How long the circuit stays open before probing
    #[serde(default = "default_reset_timeout", with = "duration_serde")]
    pub reset_timeout: Duration,

    /// Consecutive probe successes that close the circuit again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,
}

fn default_failure_threshold() -> usize {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_success_threshold() -> usize {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Circuit breaker shared by every call through one store handle
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<BreakerState>,
    failure_count: AtomicUsize,
    success_count: AtomicUsize,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Whether a request may go to the store now
    pub async fn allow_request(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let waited = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                    if waited < self.config.reset_timeout {
                        return false;
                    }
                }
            }
        }

        let mut inner = self.inner.write().await;
        // Another caller may have moved the state while we waited for the write lock
        if inner.state == CircuitState::Open {
            inner.state = CircuitState::HalfOpen;
            self.success_count.store(0, Ordering::SeqCst);
            debug!("Circuit breaker half-open, probing the store");
        }
        inner.state != CircuitState::Open
    }

    pub async fn record_success(&self) {
        let state = self.inner.read().await.state;

        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    let mut inner = self.inner.write().await;
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    self.success_count.store(0, Ordering::SeqCst);
                    self.failure_count.store(0, Ordering::SeqCst);
                    debug!(successes, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let state = self.inner.read().await.state;

        match state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open().await;
                    warn!(failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.open().await;
                warn!("Circuit breaker re-opened after a failed probe");
            }
            CircuitState::Open => {}
        }
    }

    async fn open(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        self.success_count.store(0, Ordering::SeqCst);
    }

    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}
