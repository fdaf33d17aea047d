#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tracing_test::traced_test;

    use crate::{
        algorithms::metadata::{METADATA_PREFIX, DEFAULT_METADATA_MAX_AGE},
        algorithms::{record_metadata, sweep_stale_metadata, RateLimitMetadata},
        clock::Clock,
        storage::StorageBackend,
        test_utils::memory_with_clock,
    };

    const DAY_MS: i64 = 24 * 3600 * 1000;

    #[tokio::test]
    async fn test_record_writes_json() {
        let (storage, clock) = memory_with_clock();
        let now = clock.now_millis();

        record_metadata(&storage, "user42", "/api/items", now)
            .await
            .unwrap();

        let raw = storage.get("rate_meta:user42").await.unwrap().unwrap();
        let entry: RateLimitMetadata = serde_json::from_slice(&raw).unwrap();
        assert_eq!(entry.last_endpoint, "/api/items");
        assert_eq!(entry.updated_at, now);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sweep_removes_only_stale_and_corrupt_entries() {
        let (storage, clock) = memory_with_clock();
        let now = clock.now_millis();

        record_metadata(&storage, "old", "/a", now - 8 * DAY_MS)
            .await
            .unwrap();
        record_metadata(&storage, "recent", "/b", now - DAY_MS)
            .await
            .unwrap();
        storage
            .set(&format!("{}garbage", METADATA_PREFIX), b"not json", None)
            .await
            .unwrap();
        storage.set("unrelated", b"x", None).await.unwrap();

        let removed = sweep_stale_metadata(&storage, DEFAULT_METADATA_MAX_AGE, now)
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(storage.exists("rate_meta:recent").await.unwrap());
        assert!(!storage.exists("rate_meta:old").await.unwrap());
        assert!(storage.exists("unrelated").await.unwrap());
        assert!(logs_contain("Unreadable rate-limit metadata"));
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let (storage, clock) = memory_with_clock();
        let removed = sweep_stale_metadata(&storage, Duration::from_secs(1), clock.now_millis())
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let (storage, _) = memory_with_clock();
        assert!(record_metadata(&storage, "", "/a", 0).await.is_err());
    }
}
