// src/resilience/resilient_storage.rs

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{ErrorClass, GuardError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::exponential_backoff::RetryConfig;
use crate::resilience::retry::RetryPolicy;
use crate::storage::{KeyTtl, StorageBackend, StoreScript, StoreValue};

/// Decorates any [`StorageBackend`] with retry and circuit breaking.
///
/// ```plaintext
/// caller ─► circuit breaker ─► retry policy ─► inner store
/// ```
///
/// An open circuit turns every call into an immediate `StoreUnavailable`, so
/// the rate limiters fail open without paying for a round trip. Only
/// `StoreUnavailable` counts as a breaker failure; protocol errors mean the
/// store answered. Pipelines are not retried since they are consumed on
/// execution.
#[derive(Debug, Clone)]
pub struct ResilientStorage<S> {
    inner: S,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl<S: StorageBackend> ResilientStorage<S> {
    pub fn new(inner: S, retry: RetryConfig, circuit_breaker: CircuitBreakerConfig) -> Self {
        Self::with_policy(inner, RetryPolicy::new(retry), circuit_breaker)
    }

    pub fn with_policy(
        inner: S,
        retry: RetryPolicy,
        circuit_breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            inner,
            circuit_breaker: Arc::new(CircuitBreaker::new(circuit_breaker)),
            retry,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }

    async fn admit(&self, operation: &'static str) -> Result<()> {
        if self.circuit_breaker.allow_request().await {
            Ok(())
        } else {
            debug!(operation, "Circuit open, short-circuiting store call");
            Err(GuardError::StoreUnavailable(format!(
                "circuit open, {} not attempted",
                operation
            )))
        }
    }

    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.circuit_breaker.record_success().await,
            Err(err) if err.class() == ErrorClass::StoreUnavailable => {
                self.circuit_breaker.record_failure().await
            }
            Err(_) => {}
        }
        result
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.admit(operation).await?;
        let result = self.retry.run(op).await;
        self.observe(result).await
    }
}

#[async_trait]
impl<S: StorageBackend> StorageBackend for ResilientStorage<S> {
    type Pipeline = S::Pipeline;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.guarded("get", || self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.guarded("set", || self.inner.set(key, value, ttl)).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.guarded("set_if_absent", || self.inner.set_if_absent(key, value, ttl))
            .await
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.guarded("increment", || self.inner.increment(key, amount))
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.guarded("expire", || self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.guarded("ttl", || self.inner.ttl(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.guarded("exists", || self.inner.exists(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guarded("delete", || self.inner.delete(key)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.guarded("delete_many", || self.inner.delete_many(keys))
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.guarded("scan_prefix", || self.inner.scan_prefix(prefix))
            .await
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64> {
        self.guarded("push_back", || self.inner.push_back(key, value))
            .await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.guarded("pop_front", || self.inner.pop_front(key)).await
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        self.guarded("pop_back", || self.inner.pop_back(key)).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        self.guarded("list_remove", || self.inner.list_remove(key, value))
            .await
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.guarded("list_len", || self.inner.list_len(key)).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.guarded("list_range", || self.inner.list_range(key)).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.guarded("zadd", || self.inner.zadd(key, member, score))
            .await
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.guarded("zincr", || self.inner.zincr(key, member, delta))
            .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.guarded("zrem", || self.inner.zrem(key, member)).await
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.guarded("zrem_by_score", || self.inner.zrem_by_score(key, min, max))
            .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.guarded("zcard", || self.inner.zcard(key)).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        self.guarded("zrange_by_score", || {
            self.inner.zrange_by_score(key, min, max)
        })
        .await
    }

    async fn eval_script(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64> {
        self.guarded("eval_script", || self.inner.eval_script(script, keys, args))
            .await
    }

    fn pipeline(&self) -> Self::Pipeline {
        self.inner.pipeline()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<StoreValue>> {
        self.admit("execute_pipeline").await?;
        let result = self.inner.execute_pipeline(pipeline).await;
        self.observe(result).await
    }
}
