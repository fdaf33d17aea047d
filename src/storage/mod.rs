// src/storage/mod.rs

pub mod memory;
pub mod redis;
mod scripts;

#[cfg(test)]
mod tests;

pub use memory::{MemoryPipeline, MemoryStorage};
pub use redis::{RedisPipeline, RedisStorage};
pub use scripts::StoreScript;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// A reply from one pipelined command
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Nil,
    Okay,
    Int(i64),
    Bytes(Vec<u8>),
}

impl StoreValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoreValue::Int(i) => Some(*i),
            StoreValue::Bytes(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            StoreValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists without an expiry
    Persistent,
    /// The key expires after this duration
    Expires(Duration),
}

impl KeyTtl {
    pub fn is_alive(&self) -> bool {
        matches!(self, KeyTtl::Expires(remaining) if !remaining.is_zero())
    }
}

/// Commands queued for a single round trip.
///
/// Both bundled backends execute a pipeline as one atomic unit (`MULTI`/`EXEC`
/// on Redis, a single write-lock section in memory). Results come back in
/// queue order.
pub trait StoragePipeline: Send + Sync {
    fn get(&mut self, key: &str) -> &mut Self;

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self;

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self;

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self;

    fn delete(&mut self, key: &str) -> &mut Self;

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> &mut Self;

    /// Remove members with `min <= score <= max`
    fn zrem_by_score(&mut self, key: &str, min: f64, max: f64) -> &mut Self;

    fn zcard(&mut self, key: &str) -> &mut Self;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The narrow operation set every algorithm is written against.
///
/// Implementations must make each method a single atomic step on the store.
/// Multi-step atomicity is only available through [`StorageBackend::eval_script`]
/// and [`StorageBackend::execute_pipeline`].
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    type Pipeline: StoragePipeline;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Stores the value only when the key is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>)
        -> Result<bool>;

    // Atomically increments a counter, creating it at zero when absent
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    // Sets expiration time for a key; false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// All live keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    // Appends to the tail of a list, returning the new length
    async fn push_back(&self, key: &str, value: &str) -> Result<u64>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>>;

    async fn pop_back(&self, key: &str) -> Result<Option<String>>;

    // Removes every occurrence of `value`, returning how many were removed
    async fn list_remove(&self, key: &str, value: &str) -> Result<u64>;

    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Whole list, head first
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Members with `min <= score <= max`, ascending by score
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;

    /// Runs a multi-step script as one indivisible step on the store
    async fn eval_script(&self, script: StoreScript, keys: &[&str], args: &[String])
        -> Result<i64>;

    // Creates a new pipeline for executing multiple operations
    fn pipeline(&self) -> Self::Pipeline;

    // Executes a pipeline of operations
    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<StoreValue>>;
}

/// Formats a sorted-set bound the way Redis expects infinities.
pub(crate) fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
