#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::{
        algorithms::{RateLimitAlgorithm, Throttle},
        config::ThrottleConfig,
        test_utils::memory_with_clock,
    };

    #[tokio::test]
    async fn test_one_admission_per_interval() {
        let (storage, clock) = memory_with_clock();
        let throttle = Throttle::new(
            storage,
            ThrottleConfig {
                interval: Duration::from_millis(500),
            },
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

        assert!(throttle.allow("job").await.unwrap());
        assert!(!throttle.allow("job").await.unwrap());

        clock.advance(Duration::from_millis(499));
        assert!(!throttle.allow("job").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(throttle.allow("job").await.unwrap());

        // Suppressed calls do not extend the interval
        clock.advance(Duration::from_millis(250));
        assert!(!throttle.allow("job").await.unwrap());
        clock.advance(Duration::from_millis(250));
        assert!(throttle.allow("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_callers_admit_one() {
        let (storage, _) = memory_with_clock();
        let throttle = Throttle::new(
            storage,
            ThrottleConfig {
                interval: Duration::from_secs(10),
            },
        )
        .unwrap();

        let results = join_all((0..16).map(|_| throttle.allow("job"))).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_reset_reopens_gate() {
        let (storage, _) = memory_with_clock();
        let throttle = Throttle::new(
            storage,
            ThrottleConfig {
                interval: Duration::from_secs(10),
            },
        )
        .unwrap();

        assert!(throttle.allow("job").await.unwrap());
        throttle.reset("job").await.unwrap();
        assert!(throttle.allow("job").await.unwrap());
    }
}
