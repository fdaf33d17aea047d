#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::time::Duration;
    use tracing_test::traced_test;

    use crate::{
        algorithms::{FixedWindow, RateLimitAlgorithm},
        config::{FixedWindowConfig, InMemoryConfig},
        error::{ErrorClass, GuardError},
        storage::{KeyTtl, MemoryStorage, StorageBackend},
        test_utils::{memory_with_clock, FailingStorage},
    };

    fn config(limit: u64, window_ms: u64) -> FixedWindowConfig {
        FixedWindowConfig {
            limit,
            window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test]
    async fn test_limit_then_deny_then_new_window() {
        let (storage, clock) = memory_with_clock();
        let limiter = FixedWindow::new(storage, config(3, 1_000)).unwrap();

        for expected_remaining in [2, 1, 0] {
            let status = limiter.check("user").await.unwrap();
            assert!(status.allowed);
            assert!(!status.degraded);
            assert_eq!(status.remaining, expected_remaining);
        }

        let status = limiter.check("user").await.unwrap();
        assert!(!status.allowed, "request L+1 must be denied");
        assert_eq!(status.remaining, 0);

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.allow("user").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow("user").await.unwrap(), "new window admits again");
    }

    #[tokio::test]
    async fn test_counter_gets_window_ttl() {
        let (storage, _) = memory_with_clock();
        let limiter = FixedWindow::new(storage.clone(), config(5, 2_000)).unwrap();

        limiter.check("user").await.unwrap();
        assert_eq!(
            storage.ttl("ratelimit:fixed_window:user").await.unwrap(),
            KeyTtl::Expires(Duration::from_millis(2_000))
        );

        // Later increments leave the TTL alone
        limiter.check("user").await.unwrap();
        assert_eq!(
            storage.get("ratelimit:fixed_window:user").await.unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (storage, _) = memory_with_clock();
        let limiter = FixedWindow::new(storage, config(1, 1_000)).unwrap();

        assert!(limiter.allow("a").await.unwrap());
        assert!(!limiter.allow("a").await.unwrap());
        assert!(limiter.allow("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_requests_admit_exactly_limit() {
        let storage = MemoryStorage::new(InMemoryConfig::default());
        let limiter = FixedWindow::new(storage, config(10, 60_000)).unwrap();

        let results = join_all((0..25).map(|_| limiter.allow("burst"))).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_ttl_deletes_counter_and_fails_open() {
        let (memory, _) = memory_with_clock();
        let storage = FailingStorage::failing_times(1, ErrorClass::StoreUnavailable, memory.clone())
            .only_on("expire");
        let limiter = FixedWindow::new(storage, config(1, 1_000)).unwrap();

        let status = limiter.check("user").await.unwrap();
        assert!(status.allowed);
        assert!(status.degraded);
        assert!(logs_contain("counter_without_ttl"));
        assert!(!memory.exists("ratelimit:fixed_window:user").await.unwrap());

        // The next window starts cleanly
        let status = limiter.check("user").await.unwrap();
        assert!(status.allowed);
        assert!(!status.degraded);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_persistent_counter_is_rearmed_on_denial() {
        let (storage, clock) = memory_with_clock();
        storage
            .set("ratelimit:fixed_window:stuck", b"7", None)
            .await
            .unwrap();
        let limiter = FixedWindow::new(storage.clone(), config(3, 1_000)).unwrap();

        assert!(!limiter.allow("stuck").await.unwrap());
        assert!(logs_contain("Found counter without TTL"));
        assert!(storage
            .ttl("ratelimit:fixed_window:stuck")
            .await
            .unwrap()
            .is_alive());

        clock.advance(Duration::from_millis(1_000));
        assert!(limiter.allow("stuck").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_the_window() {
        let (storage, _) = memory_with_clock();
        let limiter = FixedWindow::new(storage, config(1, 60_000)).unwrap();

        assert!(limiter.allow("user").await.unwrap());
        assert!(!limiter.allow("user").await.unwrap());

        limiter.reset("user").await.unwrap();
        assert!(limiter.allow("user").await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let (storage, _) = memory_with_clock();
        let limiter = FixedWindow::new(storage.clone(), config(1, 1_000))
            .unwrap()
            .with_key_prefix("api");

        limiter.check("user").await.unwrap();
        assert!(storage.exists("api:fixed_window:user").await.unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let storage = MemoryStorage::new(InMemoryConfig::default());
        let err = FixedWindow::new(storage, config(0, 1_000)).unwrap_err();
        assert!(matches!(err, GuardError::InvalidArgument(_)));
    }
}
