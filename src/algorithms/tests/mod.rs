// src/algorithms/tests/mod.rs

mod fixed_window_tests;
mod metadata_tests;
mod throttle_tests;
mod token_bucket_tests;

/// Failure-policy behaviour shared by every limiter
#[cfg(test)]
mod failure_policy_tests {
    use std::time::Duration;
    use tracing_test::traced_test;

    use crate::algorithms::{
        rate_limit_key, Debounce, FailureAction, FailurePolicy, FixedWindow, RateLimitAlgorithm,
        SlidingWindow, Throttle, TokenBucket,
    };
    use crate::config::{
        DebounceConfig, FixedWindowConfig, SlidingWindowConfig, ThrottleConfig, TokenBucketConfig,
    };
    use crate::error::{ErrorClass, GuardError};
    use crate::test_utils::FailingStorage;

    fn all_limiters(
        storage: FailingStorage,
        policy: FailurePolicy,
    ) -> Vec<Box<dyn RateLimitAlgorithm>> {
        let window = Duration::from_secs(1);
        vec![
            Box::new(
                FixedWindow::new(storage.clone(), FixedWindowConfig { limit: 1, window })
                    .unwrap()
                    .with_failure_policy(policy),
            ),
            Box::new(
                SlidingWindow::new(storage.clone(), SlidingWindowConfig { limit: 1, window })
                    .unwrap()
                    .with_failure_policy(policy),
            ),
            Box::new(
                TokenBucket::new(
                    storage.clone(),
                    TokenBucketConfig {
                        capacity: 1,
                        refill_rate: 1,
                        interval: window,
                    },
                )
                .unwrap()
                .with_failure_policy(policy),
            ),
            Box::new(
                Throttle::new(storage.clone(), ThrottleConfig { interval: window })
                    .unwrap()
                    .with_failure_policy(policy),
            ),
            Box::new(
                Debounce::new(
                    storage,
                    DebounceConfig {
                        interval: window,
                        rearm_on_suppressed: true,
                    },
                )
                .unwrap()
                .with_failure_policy(policy),
            ),
        ]
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unavailable_store_fails_open() {
        let storage = FailingStorage::always(ErrorClass::StoreUnavailable);

        for limiter in all_limiters(storage, FailurePolicy::default()) {
            let status = limiter.check("user:1").await.unwrap();
            assert!(status.allowed, "{} must fail open", limiter.name());
            assert!(status.degraded, "{} must flag degraded", limiter.name());
            assert!(limiter.allow("user:1").await.unwrap());
        }

        assert!(logs_contain("Store error, failing open"));
    }

    #[tokio::test]
    async fn test_protocol_error_fails_open() {
        let storage = FailingStorage::always(ErrorClass::StoreProtocol);

        for limiter in all_limiters(storage, FailurePolicy::fail_open()) {
            assert!(limiter.allow("user:1").await.unwrap(), "{}", limiter.name());
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fail_closed_denies() {
        let storage = FailingStorage::always(ErrorClass::StoreUnavailable);

        for limiter in all_limiters(storage, FailurePolicy::fail_closed()) {
            let status = limiter.check("user:1").await.unwrap();
            assert!(!status.allowed, "{} must fail closed", limiter.name());
            assert!(status.degraded);
        }

        assert!(logs_contain("Store error, failing closed"));
    }

    #[tokio::test]
    async fn test_propagate_returns_store_error() {
        let storage = FailingStorage::always(ErrorClass::StoreUnavailable);

        for limiter in all_limiters(storage, FailurePolicy::propagate()) {
            let err = limiter.check("user:1").await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::StoreUnavailable, "{}", limiter.name());
        }
    }

    #[tokio::test]
    async fn test_empty_key_is_never_swallowed() {
        let storage = FailingStorage::always(ErrorClass::StoreUnavailable);

        for limiter in all_limiters(storage.clone(), FailurePolicy::fail_open()) {
            let err = limiter.check("").await.unwrap_err();
            assert!(matches!(err, GuardError::InvalidArgument(_)), "{}", limiter.name());
            assert!(limiter.reset("").await.is_err());
        }
        assert_eq!(storage.calls(), 0, "invalid keys must not reach the store");
    }

    #[test]
    fn test_policy_table() {
        let policy = FailurePolicy {
            on_unavailable: FailureAction::Admit,
            on_protocol_error: FailureAction::Propagate,
        };
        assert_eq!(
            policy.action_for(&GuardError::StoreUnavailable("down".into())),
            FailureAction::Admit
        );
        assert_eq!(
            policy.action_for(&GuardError::StoreProtocol("bad".into())),
            FailureAction::Propagate
        );
        assert_eq!(
            FailurePolicy::fail_open().action_for(&GuardError::invalid("empty")),
            FailureAction::Propagate
        );
    }

    #[test]
    fn test_rate_limit_key_layout() {
        assert_eq!(
            rate_limit_key("fixed_window", "user42", "/api/items"),
            "fixed_window:user42:/api/items"
        );
    }
}
