// library entry
pub mod algorithms;
pub mod cache;
pub mod cache_aside;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod resilience;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export key components for convenience
pub use algorithms::{FailurePolicy, RateLimitAlgorithm, RateLimitStatus};
pub use cache::CachePolicy;
pub use cache_aside::CacheAside;
pub use config::GuardConfig;
pub use error::{ErrorClass, GuardError, Result};
pub use lock::{DistributedLock, LockGuard};
pub use logging::init as init_logging;
