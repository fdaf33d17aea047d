// src/resilience/mod.rs
//! Resilience around store calls.
//!
//! * [`RetryPolicy`] re-invokes an async operation on selected error classes
//!   with exponential (or constant) backoff.
//! * [`CircuitBreaker`] stops sending requests to a store that keeps failing.
//! * [`ResilientStorage`] composes both around any storage backend.

mod circuit_breaker;
mod exponential_backoff;
mod resilient_storage;
mod retry;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use resilient_storage::ResilientStorage;
pub use retry::RetryPolicy;
