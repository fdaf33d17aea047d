// src/storage/tests/mod.rs


// Contract checks shared by every backend. Each helper works under its own
// key prefix so the Redis run can share a server with other tests.
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{KeyTtl, StorageBackend, StoragePipeline as _, StoreScript, StoreValue};

    pub async fn test_basic_operations<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}basic", prefix);
        let counter_key = format!("{}counter", prefix);

        storage.set(&key, b"test_value", None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some(&b"test_value"[..]));

        assert_eq!(storage.increment(&counter_key, 1).await?, 1);
        assert_eq!(storage.increment(&counter_key, 3).await?, 4);
        // Counters read back as decimal text
        assert_eq!(storage.get(&counter_key).await?, Some(b"4".to_vec()));

        assert!(storage.exists(&key).await?);
        assert!(!storage.exists(&format!("{}missing", prefix)).await?);

        assert!(storage.delete(&key).await?);
        assert!(!storage.delete(&key).await?);
        assert_eq!(storage.get(&key).await?, None);

        storage.delete(&counter_key).await?;
        Ok(())
    }

    pub async fn test_set_if_absent<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}nx", prefix);

        assert!(storage.set_if_absent(&key, b"first", None).await?);
        assert!(!storage.set_if_absent(&key, b"second", None).await?);
        assert_eq!(storage.get(&key).await?, Some(b"first".to_vec()));

        storage.delete(&key).await?;
        Ok(())
    }

    pub async fn test_ttl_reporting<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}ttl", prefix);

        assert_eq!(storage.ttl(&key).await?, KeyTtl::Missing);

        storage.set(&key, b"v", None).await?;
        assert_eq!(storage.ttl(&key).await?, KeyTtl::Persistent);

        assert!(storage.expire(&key, Duration::from_secs(30)).await?);
        match storage.ttl(&key).await? {
            KeyTtl::Expires(left) => assert!(left <= Duration::from_secs(30)),
            other => panic!("expected an expiry, got {:?}", other),
        }

        assert!(!storage.expire(&format!("{}nope", prefix), Duration::from_secs(1)).await?);

        storage.delete(&key).await?;
        Ok(())
    }

    pub async fn test_list_operations<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}list", prefix);

        for item in ["a", "b", "c", "b"] {
            storage.push_back(&key, item).await?;
        }
        assert_eq!(storage.list_len(&key).await?, 4);
        assert_eq!(storage.list_range(&key).await?, vec!["a", "b", "c", "b"]);

        assert_eq!(storage.list_remove(&key, "b").await?, 2);
        assert_eq!(storage.list_range(&key).await?, vec!["a", "c"]);

        assert_eq!(storage.pop_front(&key).await?.as_deref(), Some("a"));
        assert_eq!(storage.pop_back(&key).await?.as_deref(), Some("c"));
        assert_eq!(storage.pop_back(&key).await?, None);

        // An emptied list disappears
        assert!(!storage.exists(&key).await?);
        Ok(())
    }

    pub async fn test_sorted_set_operations<S: StorageBackend>(
        storage: &S,
        prefix: &str,
    ) -> Result<()> {
        let key = format!("{}zset", prefix);

        storage.zadd(&key, "one", 1.0).await?;
        storage.zadd(&key, "two", 2.0).await?;
        storage.zadd(&key, "three", 3.0).await?;
        assert_eq!(storage.zcard(&key).await?, 3);

        assert_eq!(storage.zincr(&key, "one", 5.0).await?, 6.0);

        let ordered = storage
            .zrange_by_score(&key, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        let members: Vec<&str> = ordered.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["two", "three", "one"]);

        assert_eq!(storage.zrem_by_score(&key, f64::NEG_INFINITY, 2.5).await?, 1);
        assert!(storage.zrem(&key, "three").await?);
        assert!(!storage.zrem(&key, "three").await?);
        assert_eq!(storage.zcard(&key).await?, 1);

        storage.delete(&key).await?;
        Ok(())
    }

    pub async fn test_scan_and_delete_many<S: StorageBackend>(
        storage: &S,
        prefix: &str,
    ) -> Result<()> {
        let scan_prefix = format!("{}scan:", prefix);
        let keys: Vec<String> = (0..3).map(|i| format!("{}{}", scan_prefix, i)).collect();
        for key in &keys {
            storage.set(key, b"x", None).await?;
        }
        storage.set(&format!("{}other", prefix), b"x", None).await?;

        let mut found = storage.scan_prefix(&scan_prefix).await?;
        found.sort();
        assert_eq!(found, keys);

        assert_eq!(storage.delete_many(&keys).await?, 3);
        assert!(storage.scan_prefix(&scan_prefix).await?.is_empty());
        assert_eq!(storage.delete_many(&[]).await?, 0);

        storage.delete(&format!("{}other", prefix)).await?;
        Ok(())
    }

    pub async fn test_pipeline_operations<S: StorageBackend>(
        storage: &S,
        prefix: &str,
    ) -> Result<()> {
        let key = format!("{}pipe", prefix);
        let counter = format!("{}pipe_counter", prefix);
        let zset = format!("{}pipe_zset", prefix);

        let mut pipeline = storage.pipeline();
        pipeline
            .set(&key, b"value1", None)
            .get(&key)
            .increment(&counter, 5)
            .expire(&key, Duration::from_secs(60))
            .zadd(&zset, "m1", 1.0)
            .zadd(&zset, "m2", 2.0)
            .zrem_by_score(&zset, f64::NEG_INFINITY, 1.0)
            .zcard(&zset)
            .delete(&counter);
        assert_eq!(pipeline.len(), 9);

        let results = storage.execute_pipeline(pipeline).await?;
        assert_eq!(results.len(), 9);
        assert_eq!(results[0], StoreValue::Okay);
        assert_eq!(results[1], StoreValue::Bytes(b"value1".to_vec()));
        assert_eq!(results[2].as_int(), Some(5));
        assert_eq!(results[3].as_int(), Some(1));
        assert_eq!(results[6].as_int(), Some(1));
        assert_eq!(results[7].as_int(), Some(1));
        assert_eq!(results[8].as_int(), Some(1));

        assert!(!storage.exists(&counter).await?);

        storage.delete(&key).await?;
        storage.delete(&zset).await?;
        Ok(())
    }

    pub async fn test_lock_scripts<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}lock", prefix);

        storage
            .set(&key, b"owner-a", Some(Duration::from_secs(10)))
            .await?;

        let foreign = vec!["owner-b".to_string()];
        assert_eq!(
            storage
                .eval_script(StoreScript::ReleaseLock, &[&key], &foreign)
                .await?,
            0
        );
        assert!(storage.exists(&key).await?);

        let extend = vec!["owner-a".to_string(), "20000".to_string()];
        assert_eq!(
            storage
                .eval_script(StoreScript::ExtendLock, &[&key], &extend)
                .await?,
            1
        );
        match storage.ttl(&key).await? {
            KeyTtl::Expires(left) => assert!(left > Duration::from_secs(10)),
            other => panic!("expected an expiry, got {:?}", other),
        }

        let owner = vec!["owner-a".to_string()];
        assert_eq!(
            storage
                .eval_script(StoreScript::ReleaseLock, &[&key], &owner)
                .await?,
            1
        );
        assert!(!storage.exists(&key).await?);
        Ok(())
    }

    pub async fn test_token_bucket_script<S: StorageBackend>(
        storage: &S,
        prefix: &str,
    ) -> Result<()> {
        let key = format!("{}bucket", prefix);
        let args = |now: i64| {
            vec![
                "2".to_string(),
                "1".to_string(),
                "1000".to_string(),
                now.to_string(),
                "5000".to_string(),
            ]
        };

        let run = |now| {
            let args = args(now);
            let key = key.clone();
            async move {
                storage
                    .eval_script(StoreScript::TokenBucket, &[&key], &args)
                    .await
            }
        };

        assert_eq!(run(10_000).await?, 1);
        assert_eq!(run(10_100).await?, 0);
        assert_eq!(run(10_200).await?, -1);
        assert_eq!(run(11_050).await?, 0);

        storage.delete(&key).await?;
        Ok(())
    }

    pub async fn test_sliding_window_script<S: StorageBackend>(
        storage: &S,
        prefix: &str,
    ) -> Result<()> {
        let key = format!("{}window", prefix);
        let run = |now: i64, member: &str| {
            let args = vec![
                (now - 1_000).to_string(),
                now.to_string(),
                member.to_string(),
                "2".to_string(),
                "5000".to_string(),
            ];
            let key = key.clone();
            async move {
                storage
                    .eval_script(StoreScript::SlidingWindow, &[&key], &args)
                    .await
            }
        };

        assert_eq!(run(10_000, "a").await?, 1);
        assert_eq!(run(10_100, "b").await?, 2);
        // Over the limit: counted, then removed again
        assert_eq!(run(10_200, "c").await?, 3);
        assert_eq!(storage.zcard(&key).await?, 2);
        let members: Vec<String> = storage
            .zrange_by_score(&key, f64::NEG_INFINITY, f64::INFINITY)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        assert!(!members.contains(&"c".to_string()));

        // "a" (scored 10_000) is trimmed at the 11_000 cutoff
        assert_eq!(run(11_000, "d").await?, 2);
        assert!(matches!(storage.ttl(&key).await?, KeyTtl::Expires(_)));

        storage.delete(&key).await?;
        Ok(())
    }
}
