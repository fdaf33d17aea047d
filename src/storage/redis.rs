// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Cmd, FromRedisValue, Pipeline, Script, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::RedisConfig;
use crate::error::{GuardError, Result};
use crate::storage::{
    score_arg, ttl_millis, KeyTtl, StorageBackend, StoragePipeline, StoreScript, StoreValue,
};

const SCAN_COUNT: usize = 500;

/// Redis pipeline implementation, executed as `MULTI`/`EXEC`
pub struct RedisPipeline {
    pipeline: Pipeline,
    queued: usize,
}

impl RedisPipeline {
    fn new() -> Self {
        let mut pipeline = Pipeline::new();
        pipeline.atomic();
        Self {
            pipeline,
            queued: 0,
        }
    }

    fn push(&mut self, cmd: Cmd) -> &mut Self {
        self.pipeline.add_command(cmd);
        self.queued += 1;
        self
    }
}

impl StoragePipeline for RedisPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.push(cmd)
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        self.push(set_cmd(key, value, ttl, false))
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(amount);
        self.push(cmd)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl_millis(ttl));
        self.push(cmd)
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.push(cmd)
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> &mut Self {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score_arg(score)).arg(member);
        self.push(cmd)
    }

    fn zrem_by_score(&mut self, key: &str, min: f64, max: f64) -> &mut Self {
        let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
        cmd.arg(key).arg(score_arg(min)).arg(score_arg(max));
        self.push(cmd)
    }

    fn zcard(&mut self, key: &str) -> &mut Self {
        let mut cmd = redis::cmd("ZCARD");
        cmd.arg(key);
        self.push(cmd)
    }

    fn len(&self) -> usize {
        self.queued
    }
}

fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>, only_if_absent: bool) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    if only_if_absent {
        cmd.arg("NX");
    }
    cmd
}

/// Escapes glob metacharacters so a prefix can be used in `SCAN MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

fn convert_value(value: Value) -> Result<StoreValue> {
    match value {
        Value::Nil => Ok(StoreValue::Nil),
        Value::Okay => Ok(StoreValue::Okay),
        Value::Int(i) => Ok(StoreValue::Int(i)),
        Value::BulkString(bytes) => Ok(StoreValue::Bytes(bytes)),
        Value::SimpleString(s) if s == "OK" => Ok(StoreValue::Okay),
        Value::SimpleString(s) => Ok(StoreValue::Bytes(s.into_bytes())),
        Value::Boolean(b) => Ok(StoreValue::Int(b as i64)),
        Value::Double(d) => Ok(StoreValue::Bytes(d.to_string().into_bytes())),
        Value::ServerError(e) => Err(GuardError::StoreProtocol(format!("{:?}", e))),
        other => Err(GuardError::StoreProtocol(format!(
            "unsupported pipeline reply: {:?}",
            other
        ))),
    }
}

/// Storage backend over a shared Redis/Valkey connection
#[derive(Clone)]
pub struct RedisStorage {
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    scripts: Arc<HashMap<StoreScript, Script>>,
    config: RedisConfig,
}

impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Connects to the configured server, failing after `connection_timeout`
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Opening the client only parses the URL
        let client = Client::open(config.url.as_str())?;

        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(GuardError::StoreUnavailable(format!(
                        "Connection to {} timed out after {:?}",
                        config.url, config.connection_timeout
                    )));
                }
            };

        let scripts = [
            StoreScript::TokenBucket,
            StoreScript::SlidingWindow,
            StoreScript::ReleaseLock,
            StoreScript::ExtendLock,
        ]
        .into_iter()
        .map(|script| (script, Script::new(script.lua())))
        .collect();

        debug!(url = %config.url, "Connected to store");

        Ok(Self {
            connection: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            scripts: Arc::new(scripts),
            config,
        })
    }

    /// Ping the server to check health
    pub async fn ping(&self) -> Result<()> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(GuardError::StoreProtocol(format!(
                "Unexpected response from PING: {}",
                reply
            )))
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.connection.lock().await;
        match tokio::time::timeout(self.config.command_timeout, cmd.query_async::<T>(&mut *conn))
            .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn timed_out(&self) -> GuardError {
        GuardError::StoreUnavailable(format!(
            "command timed out after {:?}",
            self.config.command_timeout
        ))
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Pipeline = RedisPipeline;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let _: Value = self.query(&set_cmd(key, value, ttl, false)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let reply: Value = self.query(&set_cmd(key, value, ttl, true)).await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(amount)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let millis: i64 = self.query(redis::cmd("PTTL").arg(key)).await?;
        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = glob_escape(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("LPOP").arg(key)).await
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("RPOP").arg(key)).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        self.query(redis::cmd("LREM").arg(key).arg(0).arg(value))
            .await
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(0).arg(-1))
            .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let _: i64 = self
            .query(redis::cmd("ZADD").arg(key).arg(score_arg(score)).arg(member))
            .await?;
        Ok(())
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.query(redis::cmd("ZINCRBY").arg(key).arg(delta).arg(member))
            .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("ZREM").arg(key).arg(member)).await?;
        Ok(removed > 0)
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.query(
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(score_arg(min))
                .arg(score_arg(max)),
        )
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("ZCARD").arg(key)).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        self.query(
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(score_arg(min))
                .arg(score_arg(max))
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn eval_script(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64> {
        let lua = self.scripts.get(&script).ok_or_else(|| {
            GuardError::StoreProtocol(format!("script {} is not loaded", script.name()))
        })?;

        let mut invocation = lua.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        let mut conn = self.connection.lock().await;
        match tokio::time::timeout(
            self.config.command_timeout,
            invocation.invoke_async::<i64>(&mut *conn),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn pipeline(&self) -> Self::Pipeline {
        RedisPipeline::new()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<StoreValue>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.lock().await;
        let replies: Vec<Value> = match tokio::time::timeout(
            self.config.command_timeout,
            pipeline.pipeline.query_async::<Vec<Value>>(&mut *conn),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out()),
        };

        replies.into_iter().map(convert_value).collect()
    }
}
