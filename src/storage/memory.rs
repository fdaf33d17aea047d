// src/storage/memory.rs

// In-memory storage (for testing and single-process usage)
// Every public operation, every script and every pipeline runs inside one
// write-lock section, which gives it the same atomicity a Redis command has.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::clock::{system_clock, SharedClock};
use crate::config::InMemoryConfig;
use crate::error::{GuardError, Result};
use crate::storage::scripts::{token_bucket_step, BucketState};
use crate::storage::{KeyTtl, StorageBackend, StoragePipeline, StoreScript, StoreValue};

/// A simple pipeline implementation for in-memory storage
#[derive(Debug, Default)]
pub struct MemoryPipeline {
    operations: Vec<MemoryOperation>,
}

/// Represents an operation in the memory pipeline
#[derive(Debug)]
enum MemoryOperation {
    Get(String),
    Set(String, Vec<u8>, Option<Duration>),
    Increment(String, i64),
    Expire(String, Duration),
    Delete(String),
    ZAdd(String, String, f64),
    ZRemByScore(String, f64, f64),
    ZCard(String),
}

impl StoragePipeline for MemoryPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        self.operations.push(MemoryOperation::Get(key.to_string()));
        self
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        self.operations
            .push(MemoryOperation::Set(key.to_string(), value.to_vec(), ttl));
        self
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        self.operations
            .push(MemoryOperation::Increment(key.to_string(), amount));
        self
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.operations
            .push(MemoryOperation::Expire(key.to_string(), ttl));
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        self.operations.push(MemoryOperation::Delete(key.to_string()));
        self
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> &mut Self {
        self.operations.push(MemoryOperation::ZAdd(
            key.to_string(),
            member.to_string(),
            score,
        ));
        self
    }

    fn zrem_by_score(&mut self, key: &str, min: f64, max: f64) -> &mut Self {
        self.operations
            .push(MemoryOperation::ZRemByScore(key.to_string(), min, max));
        self
    }

    fn zcard(&mut self, key: &str) -> &mut Self {
        self.operations.push(MemoryOperation::ZCard(key.to_string()));
        self
    }

    fn len(&self) -> usize {
        self.operations.len()
    }
}

#[derive(Debug)]
enum MemoryValue {
    Bytes(Vec<u8>),
    List(VecDeque<String>),
    SortedSet(HashMap<String, f64>),
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<i64>,
}

impl MemoryEntry {
    fn new(value: MemoryValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

fn wrong_type(key: &str) -> GuardError {
    GuardError::StoreProtocol(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

fn expiry(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

/// The keyspace. Methods take `now` so expiry is judged once per operation.
#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
}

impl MemoryState {
    fn purge_if_expired(&mut self, key: &str, now: i64) {
        if matches!(self.entries.get(key), Some(entry) if entry.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn live(&mut self, key: &str, now: i64) -> Option<&mut MemoryEntry> {
        self.purge_if_expired(key, now);
        self.entries.get_mut(key)
    }

    fn ensure_room(&mut self, key: &str, now: i64, max_entries: usize) -> Result<()> {
        if self.entries.contains_key(key) || self.entries.len() < max_entries {
            return Ok(());
        }
        self.purge_expired(now);
        if self.entries.len() >= max_entries {
            return Err(GuardError::StoreProtocol(
                "OOM maximum entries limit exceeded".to_string(),
            ));
        }
        Ok(())
    }

    fn insert(&mut self, key: &str, entry: MemoryEntry, now: i64, max: usize) -> Result<()> {
        self.ensure_room(key, now, max)?;
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn get(&mut self, key: &str, now: i64) -> Result<Option<Vec<u8>>> {
        match self.live(key, now).map(|entry| &entry.value) {
            None => Ok(None),
            Some(MemoryValue::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        now: i64,
        max: usize,
    ) -> Result<()> {
        let entry = MemoryEntry {
            value: MemoryValue::Bytes(value.to_vec()),
            expires_at: expiry(now, ttl),
        };
        self.purge_if_expired(key, now);
        self.insert(key, entry, now, max)
    }

    fn increment(&mut self, key: &str, amount: i64, now: i64, max: usize) -> Result<i64> {
        match self.live(key, now) {
            Some(entry) => {
                let MemoryValue::Bytes(bytes) = &mut entry.value else {
                    return Err(wrong_type(key));
                };
                let current = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .ok_or_else(|| {
                        GuardError::StoreProtocol(format!(
                            "value at '{}' is not an integer",
                            key
                        ))
                    })?;
                let next = current.checked_add(amount).ok_or_else(|| {
                    GuardError::StoreProtocol(format!("increment at '{}' would overflow", key))
                })?;
                *bytes = next.to_string().into_bytes();
                Ok(next)
            }
            None => {
                let entry = MemoryEntry::new(MemoryValue::Bytes(amount.to_string().into_bytes()));
                self.insert(key, entry, now, max)?;
                Ok(amount)
            }
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: i64) -> bool {
        match self.live(key, now) {
            Some(entry) => {
                entry.expires_at = expiry(now, Some(ttl));
                true
            }
            None => false,
        }
    }

    fn ttl(&mut self, key: &str, now: i64) -> KeyTtl {
        match self.live(key, now) {
            None => KeyTtl::Missing,
            Some(MemoryEntry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(Duration::from_millis((*at - now).max(0) as u64)),
        }
    }

    fn delete(&mut self, key: &str, now: i64) -> bool {
        self.purge_if_expired(key, now);
        self.entries.remove(key).is_some()
    }

    fn list_entry(&mut self, key: &str, now: i64, max: usize) -> Result<&mut VecDeque<String>> {
        self.purge_if_expired(key, now);
        if !self.entries.contains_key(key) {
            self.insert(key, MemoryEntry::new(MemoryValue::List(VecDeque::new())), now, max)?;
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(MemoryValue::List(list)) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn existing_list(&mut self, key: &str, now: i64) -> Result<Option<&mut VecDeque<String>>> {
        match self.live(key, now).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(MemoryValue::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Applies `op` to an existing list and drops the key once it is empty.
    fn with_list<T>(
        &mut self,
        key: &str,
        now: i64,
        empty: T,
        op: impl FnOnce(&mut VecDeque<String>) -> T,
    ) -> Result<T> {
        let (result, now_empty) = match self.existing_list(key, now)? {
            None => return Ok(empty),
            Some(list) => {
                let result = op(list);
                (result, list.is_empty())
            }
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(result)
    }

    fn zset_entry(&mut self, key: &str, now: i64, max: usize) -> Result<&mut HashMap<String, f64>> {
        self.purge_if_expired(key, now);
        if !self.entries.contains_key(key) {
            self.insert(
                key,
                MemoryEntry::new(MemoryValue::SortedSet(HashMap::new())),
                now,
                max,
            )?;
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(MemoryValue::SortedSet(set)) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    fn with_zset<T>(
        &mut self,
        key: &str,
        now: i64,
        empty: T,
        op: impl FnOnce(&mut HashMap<String, f64>) -> T,
    ) -> Result<T> {
        let (result, now_empty) = match self.live(key, now).map(|entry| &mut entry.value) {
            None => return Ok(empty),
            Some(MemoryValue::SortedSet(set)) => {
                let result = op(set);
                (result, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(result)
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64, now: i64, max: usize) -> Result<bool> {
        let set = self.zset_entry(key, now, max)?;
        Ok(set.insert(member.to_string(), score).is_none())
    }

    fn zrem_by_score(&mut self, key: &str, min: f64, max_score: f64, now: i64) -> Result<u64> {
        self.with_zset(key, now, 0, |set| {
            let before = set.len();
            set.retain(|_, score| *score < min || *score > max_score);
            (before - set.len()) as u64
        })
    }

    fn zcard(&mut self, key: &str, now: i64) -> Result<u64> {
        self.with_zset(key, now, 0, |set| set.len() as u64)
    }

    fn eval(&mut self, script: StoreScript, keys: &[&str], args: &[String], now: i64, max: usize) -> Result<i64> {
        let (key_count, arg_count) = script.expected_args();
        if keys.len() != key_count || args.len() != arg_count {
            return Err(GuardError::StoreProtocol(format!(
                "script {} expects {} keys and {} args",
                script.name(),
                key_count,
                arg_count
            )));
        }
        let key = keys[0];

        match script {
            StoreScript::TokenBucket => {
                let numbers = parse_int_args(script, args)?;
                let state = match self.get(key, now)? {
                    Some(raw) => Some(decode_bucket(key, &raw)?),
                    None => None,
                };
                let (next, result) =
                    token_bucket_step(state, numbers[0], numbers[1], numbers[2], numbers[3]);
                let encoded = format!("{}:{}", next.tokens, next.last_refill);
                let ttl = Duration::from_millis(numbers[4].max(1) as u64);
                self.set(key, encoded.as_bytes(), Some(ttl), now, max)?;
                Ok(result)
            }
            StoreScript::SlidingWindow => {
                let window = parse_int_args(script, &args[..2])?;
                let bounds = parse_int_args(script, &args[3..])?;
                let member = args[2].as_str();

                self.zrem_by_score(key, f64::NEG_INFINITY, window[0] as f64, now)?;
                self.zadd(key, member, window[1] as f64, now, max)?;
                let count = self.zcard(key, now)?;
                if count > bounds[0].max(0) as u64 {
                    self.with_zset(key, now, (), |set| {
                        set.remove(member);
                    })?;
                }
                self.expire(key, Duration::from_millis(bounds[1].max(1) as u64), now);
                Ok(count as i64)
            }
            StoreScript::ReleaseLock => {
                if self.get(key, now)?.as_deref() == Some(args[0].as_bytes()) {
                    self.entries.remove(key);
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            StoreScript::ExtendLock => {
                let ttl_ms = parse_int_args(script, &args[1..])?[0];
                if self.get(key, now)?.as_deref() == Some(args[0].as_bytes()) {
                    Ok(self.expire(key, Duration::from_millis(ttl_ms.max(1) as u64), now) as i64)
                } else {
                    Ok(0)
                }
            }
        }
    }
}

fn parse_int_args(script: StoreScript, args: &[String]) -> Result<Vec<i64>> {
    args.iter()
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| {
                GuardError::StoreProtocol(format!(
                    "script {} got a non-integer argument: {}",
                    script.name(),
                    raw
                ))
            })
        })
        .collect()
}

fn decode_bucket(key: &str, raw: &[u8]) -> Result<BucketState> {
    let corrupt = || GuardError::StoreProtocol(format!("corrupt token bucket at '{}'", key));
    let text = std::str::from_utf8(raw).map_err(|_| corrupt())?;
    let (tokens, last) = text.split_once(':').ok_or_else(corrupt)?;
    Ok(BucketState {
        tokens: tokens.parse().map_err(|_| corrupt())?,
        last_refill: last.parse().map_err(|_| corrupt())?,
    })
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
    config: InMemoryConfig,
    clock: SharedClock,
}

impl MemoryStorage {
    /// Creates a new in-memory storage on the system clock
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Creates a storage whose TTLs are judged by `clock`
    pub fn with_clock(config: InMemoryConfig, clock: SharedClock) -> Self {
        let state = Arc::new(RwLock::new(MemoryState::default()));

        if config.use_background_task {
            Self::spawn_cleanup(Arc::downgrade(&state), clock.clone(), config.cleanup_interval);
        }

        Self {
            state,
            config,
            clock,
        }
    }

    /// Background sweep of expired entries; stops once the storage is dropped
    fn spawn_cleanup(state: Weak<RwLock<MemoryState>>, clock: SharedClock, every: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, expired entries are purged lazily only");
            return;
        };

        handle.spawn(async move {
            let mut interval = time::interval(every);
            loop {
                interval.tick().await;
                let Some(shared) = state.upgrade() else {
                    break;
                };
                let purged = match shared.write() {
                    Ok(mut guard) => guard.purge_expired(clock.now_millis()),
                    Err(_) => {
                        warn!("Memory store lock poisoned, stopping cleanup");
                        break;
                    }
                };
                if purged > 0 {
                    debug!(purged, "Purged expired in-memory entries");
                }
            }
        });
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| GuardError::StoreProtocol("memory store lock poisoned".to_string()))
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.now();
        self.state
            .read()
            .map(|state| state.entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries physically held, expired ones included
    #[cfg(test)]
    pub(crate) fn stored_len(&self) -> usize {
        self.state.read().map(|state| state.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Pipeline = MemoryPipeline;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.now();
        self.write()?.get(key, now)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = self.now();
        self.write()?
            .set(key, value, ttl, now, self.config.max_entries)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = self.now();
        let mut state = self.write()?;
        if state.live(key, now).is_some() {
            return Ok(false);
        }
        state.set(key, value, ttl, now, self.config.max_entries)?;
        Ok(true)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let now = self.now();
        self.write()?
            .increment(key, amount, now, self.config.max_entries)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.now();
        Ok(self.write()?.expire(key, ttl, now))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = self.now();
        Ok(self.write()?.ttl(key, now))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.now();
        Ok(self.write()?.live(key, now).is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.now();
        Ok(self.write()?.delete(key, now))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let now = self.now();
        let mut state = self.write()?;
        Ok(keys.iter().filter(|key| state.delete(key, now)).count() as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.now();
        let state = self.write()?;
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64> {
        let now = self.now();
        let mut state = self.write()?;
        let list = state.list_entry(key, now, self.config.max_entries)?;
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        self.write()?.with_list(key, now, None, |list| list.pop_front())
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        self.write()?.with_list(key, now, None, |list| list.pop_back())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        let now = self.now();
        self.write()?.with_list(key, now, 0, |list| {
            let before = list.len();
            list.retain(|item| item != value);
            (before - list.len()) as u64
        })
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let now = self.now();
        self.write()?
            .with_list(key, now, 0, |list| list.len() as u64)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let now = self.now();
        self.write()?.with_list(key, now, Vec::new(), |list| {
            list.iter().cloned().collect()
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let now = self.now();
        self.write()?
            .zadd(key, member, score, now, self.config.max_entries)?;
        Ok(())
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        let now = self.now();
        let mut state = self.write()?;
        let set = state.zset_entry(key, now, self.config.max_entries)?;
        let score = set.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let now = self.now();
        self.write()?
            .with_zset(key, now, false, |set| set.remove(member).is_some())
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let now = self.now();
        self.write()?.zrem_by_score(key, min, max, now)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let now = self.now();
        self.write()?.zcard(key, now)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let now = self.now();
        self.write()?.with_zset(key, now, Vec::new(), |set| {
            let mut members: Vec<(String, f64)> = set
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            members
        })
    }

    async fn eval_script(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64> {
        let now = self.now();
        self.write()?
            .eval(script, keys, args, now, self.config.max_entries)
    }

    fn pipeline(&self) -> Self::Pipeline {
        MemoryPipeline::default()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<StoreValue>> {
        let now = self.now();
        let max = self.config.max_entries;
        let mut state = self.write()?;
        let mut results = Vec::with_capacity(pipeline.operations.len());

        for op in pipeline.operations {
            let value = match op {
                MemoryOperation::Get(key) => match state.get(&key, now)? {
                    Some(bytes) => StoreValue::Bytes(bytes),
                    None => StoreValue::Nil,
                },
                MemoryOperation::Set(key, value, ttl) => {
                    state.set(&key, &value, ttl, now, max)?;
                    StoreValue::Okay
                }
                MemoryOperation::Increment(key, amount) => {
                    StoreValue::Int(state.increment(&key, amount, now, max)?)
                }
                MemoryOperation::Expire(key, ttl) => {
                    StoreValue::Int(state.expire(&key, ttl, now) as i64)
                }
                MemoryOperation::Delete(key) => StoreValue::Int(state.delete(&key, now) as i64),
                MemoryOperation::ZAdd(key, member, score) => {
                    StoreValue::Int(state.zadd(&key, &member, score, now, max)? as i64)
                }
                MemoryOperation::ZRemByScore(key, min, max_score) => {
                    StoreValue::Int(state.zrem_by_score(&key, min, max_score, now)? as i64)
                }
                MemoryOperation::ZCard(key) => StoreValue::Int(state.zcard(&key, now)? as i64),
            };
            results.push(value);
        }

        Ok(results)
    }
}
