#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::{
        algorithms::{RateLimitAlgorithm, TokenBucket},
        clock::ManualClock,
        config::TokenBucketConfig,
        storage::{MemoryStorage, StorageBackend},
        test_utils::memory_with_clock,
    };

    fn bucket(
        capacity: u64,
        refill_rate: u64,
        interval_ms: u64,
    ) -> (TokenBucket<MemoryStorage>, MemoryStorage, ManualClock) {
        let (storage, clock) = memory_with_clock();
        let limiter = TokenBucket::new(
            storage.clone(),
            TokenBucketConfig {
                capacity,
                refill_rate,
                interval: Duration::from_millis(interval_ms),
            },
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
        (limiter, storage, clock)
    }

    #[tokio::test]
    async fn test_token_consumption_and_depletion() {
        let (limiter, _, _) = bucket(5, 1, 1_000);

        for i in 0..5u64 {
            let status = limiter.check("user").await.unwrap();
            assert!(status.allowed, "request {} should be allowed", i);
            assert_eq!(status.remaining, 5 - i - 1);
        }

        let status = limiter.check("user").await.unwrap();
        assert!(!status.allowed, "request when tokens depleted should be denied");
        assert_eq!(status.remaining, 0);

        let status = limiter.check("other_user").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 4);
    }

    #[tokio::test]
    async fn test_refill_after_interval() {
        let (limiter, _, clock) = bucket(3, 2, 1_000);

        for _ in 0..3 {
            assert!(limiter.allow("user").await.unwrap());
        }
        assert!(!limiter.allow("user").await.unwrap());

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.allow("user").await.unwrap());

        // One interval brings exactly refill_rate tokens back
        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow("user").await.unwrap());
        assert!(limiter.allow("user").await.unwrap());
        assert!(!limiter.allow("user").await.unwrap());
    }

    #[tokio::test]
    async fn test_refill_never_exceeds_capacity() {
        let (limiter, _, clock) = bucket(3, 1, 1_000);

        assert!(limiter.allow("user").await.unwrap());
        clock.advance(Duration::from_secs(3));

        let status = limiter.check("user").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 2);
    }

    #[tokio::test]
    async fn test_fast_callers_keep_partial_refill() {
        let (limiter, _, clock) = bucket(1, 1, 1_000);

        assert!(limiter.allow("user").await.unwrap());

        // Denied calls every 400ms must not push the next refill out
        for _ in 0..2 {
            clock.advance(Duration::from_millis(400));
            assert!(!limiter.allow("user").await.unwrap());
        }
        clock.advance(Duration::from_millis(200));
        assert!(limiter.allow("user").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_ttl() {
        let (limiter, storage, _) = bucket(10, 2, 1_000);
        assert_eq!(limiter.state_ttl(), Duration::from_secs(5));

        limiter.check("user").await.unwrap();
        assert!(storage
            .ttl("ratelimit:token_bucket:user")
            .await
            .unwrap()
            .is_alive());

        let (small, _, _) = bucket(1, 5, 1_000);
        assert_eq!(small.state_ttl(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_concurrent_requests_consume_each_token_once() {
        let (limiter, _, _) = bucket(8, 1, 60_000);

        let results = join_all((0..20).map(|_| limiter.allow("burst"))).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 8);
    }

    #[tokio::test]
    async fn test_reset_refills_bucket() {
        let (limiter, _, _) = bucket(1, 1, 60_000);

        assert!(limiter.allow("user").await.unwrap());
        assert!(!limiter.allow("user").await.unwrap());
        limiter.reset("user").await.unwrap();
        assert!(limiter.allow("user").await.unwrap());
    }
}
