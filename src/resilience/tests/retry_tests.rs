// src/resilience/tests/retry_tests.rs

use std::time::Duration;
use tokio::time::Instant;
use tracing_test::traced_test;

use crate::error::{ErrorClass, GuardError};
use crate::resilience::{RetryConfig, RetryPolicy};
use crate::test_utils::{simulated_error, CallCounter};

fn policy(attempts: usize, delay_ms: u64, backoff: f64) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts: attempts,
        initial_backoff: Duration::from_millis(delay_ms),
        max_backoff: Duration::from_secs(60),
        backoff_multiplier: backoff,
        use_jitter: false,
    })
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_after_k_failures_with_k_plus_one_calls() {
    let retry = policy(5, 100, 2.0);
    let calls = CallCounter::default();
    let started = Instant::now();

    let value = retry
        .run(|| {
            let call = calls.hit();
            async move {
                if call <= 3 {
                    Err(simulated_error(ErrorClass::StoreUnavailable))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 4);
    assert_eq!(calls.count(), 4);
    // Slept 100 + 200 + 400
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(710), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_reraises_last_error_when_exhausted() {
    let retry = policy(3, 10, 1.0);
    let calls = CallCounter::default();

    let err = retry
        .run(|| {
            let call = calls.hit();
            async move {
                Err::<(), _>(GuardError::StoreUnavailable(format!("attempt {}", call)))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.count(), 3);
    assert!(matches!(err, GuardError::StoreUnavailable(msg) if msg == "attempt 3"));
}

#[tokio::test]
async fn test_never_retries_outside_the_configured_set() {
    let retry = policy(5, 10, 2.0);
    let calls = CallCounter::default();

    let err = retry
        .run(|| {
            calls.hit();
            async { Err::<(), _>(simulated_error(ErrorClass::InvalidArgument)) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.count(), 1);
    assert_eq!(err.class(), ErrorClass::InvalidArgument);
}

#[tokio::test(start_paused = true)]
async fn test_custom_error_set() {
    let retry = policy(3, 10, 1.0).retry_on([ErrorClass::StoreProtocol]);
    let calls = CallCounter::default();

    let result = retry
        .run(|| {
            let call = calls.hit();
            async move {
                if call == 1 {
                    Err(simulated_error(ErrorClass::StoreProtocol))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.count(), 2);

    assert!(!retry.should_retry(&simulated_error(ErrorClass::StoreUnavailable)));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_each_retry_is_logged() {
    let retry = policy(2, 10, 1.0);

    let _ = retry
        .run(|| async { Err::<(), _>(simulated_error(ErrorClass::StoreUnavailable)) })
        .await;

    assert!(logs_contain("Operation failed, retrying"));
    assert!(logs_contain("Giving up after final attempt"));
}
