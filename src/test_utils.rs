// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::config::InMemoryConfig;
use crate::error::{ErrorClass, GuardError, Result};
use crate::storage::{
    KeyTtl, MemoryPipeline, MemoryStorage, StorageBackend, StoreScript, StoreValue,
};

/// A memory store driven by a manual clock, plus the clock
pub fn memory_with_clock() -> (MemoryStorage, ManualClock) {
    let clock = ManualClock::default();
    let storage = MemoryStorage::with_clock(InMemoryConfig::default(), Arc::new(clock.clone()));
    (storage, clock)
}

pub fn simulated_error(class: ErrorClass) -> GuardError {
    match class {
        ErrorClass::StoreUnavailable => {
            GuardError::StoreUnavailable("simulated connection refused".to_string())
        }
        ErrorClass::StoreProtocol => {
            GuardError::StoreProtocol("simulated malformed reply".to_string())
        }
        ErrorClass::InvalidArgument => GuardError::invalid("simulated bad argument"),
        ErrorClass::LockTimeout => GuardError::LockTimeout {
            name: "simulated".to_string(),
            waited_ms: 0,
        },
        ErrorClass::LockNotOwned => GuardError::LockNotOwned("simulated".to_string()),
        ErrorClass::Other => GuardError::Config("simulated".to_string()),
    }
}

/// Counts calls into a closure-driven test operation
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Records a call and returns its 1-based number
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

const ALWAYS: usize = usize::MAX;

/// Storage whose calls fail with a chosen error class.
///
/// Either every call fails, or the first `n` calls fail and later ones are
/// served by an inner [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct FailingStorage {
    inner: MemoryStorage,
    class: ErrorClass,
    remaining_failures: Arc<AtomicUsize>,
    only_on: Option<&'static str>,
    calls: CallCounter,
}

impl FailingStorage {
    pub fn always(class: ErrorClass) -> Self {
        Self::failing_times(ALWAYS, class, MemoryStorage::new(InMemoryConfig::default()))
    }

    pub fn failing_times(failures: usize, class: ErrorClass, inner: MemoryStorage) -> Self {
        Self {
            inner,
            class,
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            only_on: None,
            calls: CallCounter::default(),
        }
    }

    /// Restricts failures to one operation (named like the trait method);
    /// every other operation goes straight to the inner store
    pub fn only_on(mut self, operation: &'static str) -> Self {
        self.only_on = Some(operation);
        self
    }

    /// Calls attempted so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.count()
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.calls.hit();
        if matches!(self.only_on, Some(only) if only != operation) {
            return Ok(());
        }
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok();
        if failed {
            Err(simulated_error(self.class))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for FailingStorage {
    type Pipeline = MemoryPipeline;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check("set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.check("set_if_absent")?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.check("increment")?;
        self.inner.increment(key, amount).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check("ttl")?;
        self.inner.ttl(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("delete")?;
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.check("delete_many")?;
        self.inner.delete_many(keys).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check("scan_prefix")?;
        self.inner.scan_prefix(prefix).await
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64> {
        self.check("push_back")?;
        self.inner.push_back(key, value).await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.check("pop_front")?;
        self.inner.pop_front(key).await
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        self.check("pop_back")?;
        self.inner.pop_back(key).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        self.check("list_remove")?;
        self.inner.list_remove(key, value).await
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.check("list_len")?;
        self.inner.list_len(key).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.check("list_range")?;
        self.inner.list_range(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.check("zadd")?;
        self.inner.zadd(key, member, score).await
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.check("zincr")?;
        self.inner.zincr(key, member, delta).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.check("zrem")?;
        self.inner.zrem(key, member).await
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.check("zrem_by_score")?;
        self.inner.zrem_by_score(key, min, max).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check("zcard")?;
        self.inner.zcard(key).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        self.check("zrange_by_score")?;
        self.inner.zrange_by_score(key, min, max).await
    }

    async fn eval_script(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64> {
        self.check("eval_script")?;
        self.inner.eval_script(script, keys, args).await
    }

    fn pipeline(&self) -> Self::Pipeline {
        self.inner.pipeline()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<StoreValue>> {
        self.check("execute_pipeline")?;
        self.inner.execute_pipeline(pipeline).await
    }
}
