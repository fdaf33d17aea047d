// src/clock.rs

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock time in milliseconds since the Unix epoch.
///
/// Algorithms pass `now` to the store explicitly, so every caller sharing a
/// store should read the same kind of clock.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock, shared between clones.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBackend;
    use crate::test_utils::memory_with_clock;

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_millis(), 1_250);

        other.set(5_000);
        assert_eq!(clock.now_millis(), 5_000);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(system_clock().now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_store_ttls_follow_the_injected_clock() {
        let (storage, clock) = memory_with_clock();

        tokio_test::block_on(async {
            storage
                .set("ttl_probe", b"1", Some(Duration::from_secs(1)))
                .await
                .unwrap();
            clock.advance(Duration::from_millis(999));
            assert!(storage.exists("ttl_probe").await.unwrap());
            clock.advance(Duration::from_millis(1));
            assert!(!storage.exists("ttl_probe").await.unwrap());
        });
    }
}
