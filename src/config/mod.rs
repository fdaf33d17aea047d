// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Top-level configuration, usually loaded from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub redis: RedisConfig,

    /// Prefix applied to every rate-limit key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub cache_aside: CacheAsideConfig,
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

impl GuardConfig {
    /// Loads `.env` (if present) and reads `VALKEY_*` variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let redis = RedisConfig {
            url: env_or("VALKEY_URL", "redis://127.0.0.1:6379".to_string())?,
            connection_timeout: Duration::from_millis(env_or(
                "VALKEY_CONNECT_TIMEOUT_MS",
                2_000u64,
            )?),
            command_timeout: Duration::from_millis(env_or("VALKEY_COMMAND_TIMEOUT_MS", 5_000u64)?),
        };

        let retry = RetryConfig {
            max_attempts: env_or("VALKEY_RETRY_ATTEMPTS", 3usize)?,
            initial_backoff: Duration::from_millis(env_or("VALKEY_RETRY_DELAY_MS", 100u64)?),
            ..RetryConfig::default()
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("VALKEY_FAILURE_THRESHOLD", 3usize)?,
            reset_timeout: Duration::from_secs(env_or("VALKEY_RECOVERY_TIMEOUT_SECS", 30u64)?),
            ..CircuitBreakerConfig::default()
        };

        let config = Self {
            redis,
            key_prefix: env_or("VALKEY_KEY_PREFIX", default_key_prefix())?,
            retry,
            circuit_breaker,
            lock: LockConfig::default(),
            cache_aside: CacheAsideConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            return Err(GuardError::Config("redis url must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(GuardError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        self.lock.validate()?;
        self.cache_aside.validate()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| GuardError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Configuration for the Redis/Valkey storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Upper bound for any single command round trip
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: false,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for fixed window algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Maximum number of requests admitted per window
    pub limit: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl FixedWindowConfig {
    pub fn validate(&self) -> Result<()> {
        positive(self.limit, "limit")?;
        positive_duration(self.window, "window")
    }
}

/// Configuration for sliding window algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Maximum number of requests admitted in any trailing window
    pub limit: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl SlidingWindowConfig {
    pub fn validate(&self) -> Result<()> {
        positive(self.limit, "limit")?;
        positive_duration(self.window, "window")
    }
}

/// Configuration for token bucket algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Capacity of the token bucket
    pub capacity: u64,

    /// Tokens added per elapsed interval
    pub refill_rate: u64,

    /// Refill interval
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<()> {
        positive(self.capacity, "capacity")?;
        positive(self.refill_rate, "refill_rate")?;
        positive_duration(self.interval, "interval")
    }
}

/// Configuration for throttle gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<()> {
        positive_duration(self.interval, "interval")
    }
}

/// Configuration for debounce gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Push the marker's expiry back on every suppressed call, so the gate
    /// reopens only after `interval` of inactivity
    #[serde(default = "default_rearm")]
    pub rearm_on_suppressed: bool,
}

fn default_rearm() -> bool {
    true
}

impl DebounceConfig {
    pub fn validate(&self) -> Result<()> {
        positive_duration(self.interval, "interval")
    }
}

/// Configuration shared by the eviction-policy caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Prefix separating this cache's keys from everything else in the store
    pub namespace: String,

    /// Maximum number of live entries
    pub capacity: usize,

    /// TTL used when `set` is called without one; `None` keeps entries until evicted
    #[serde(default = "default_cache_ttl", with = "option_duration_serde")]
    pub default_ttl: Option<Duration>,
}

fn default_cache_ttl() -> Option<Duration> {
    Some(Duration::from_secs(3600))
}

impl CacheConfig {
    pub fn new(namespace: impl Into<String>, capacity: usize) -> Self {
        Self {
            namespace: namespace.into(),
            capacity,
            default_ttl: default_cache_ttl(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(GuardError::invalid("namespace must not be empty"));
        }
        positive(self.capacity as u64, "capacity")?;
        if let Some(ttl) = self.default_ttl {
            positive_duration(ttl, "default_ttl")?;
        }
        Ok(())
    }
}

/// Configuration for the distributed lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a held lock lives without being released or extended
    #[serde(default = "default_lock_ttl", with = "duration_serde")]
    pub ttl: Duration,

    /// Delay between attempts in a blocking acquire
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Give up a blocking acquire after this long; `None` waits forever
    #[serde(default = "default_lock_timeout", with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_lock_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_lock_ttl(),
            poll_interval: default_poll_interval(),
            timeout: default_lock_timeout(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<()> {
        positive_duration(self.ttl, "lock ttl")?;
        positive_duration(self.poll_interval, "lock poll_interval")
    }
}

/// Configuration for the cache-aside helper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheAsideConfig {
    /// Lock settings for single-flight recomputation
    #[serde(default)]
    pub lock: LockConfig,

    /// Upper bound of the random extra TTL added to every stored value
    #[serde(default = "default_max_jitter", with = "duration_serde")]
    pub max_jitter: Duration,

    /// Chance that a cache hit schedules a background refresh (0.0 disables)
    #[serde(default)]
    pub refresh_probability: f64,

    /// How long a stale copy outlives the fresh value; zero disables stale fallback
    #[serde(default = "default_stale_ttl", with = "duration_serde")]
    pub stale_ttl: Duration,

    /// Number of values per pipeline when warming
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_max_jitter() -> Duration {
    Duration::from_secs(60)
}

fn default_stale_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_batch_size() -> usize {
    100
}

impl Default for CacheAsideConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            max_jitter: default_max_jitter(),
            refresh_probability: 0.0,
            stale_ttl: default_stale_ttl(),
            batch_size: default_batch_size(),
        }
    }
}

impl CacheAsideConfig {
    pub fn validate(&self) -> Result<()> {
        self.lock.validate()?;
        if !(0.0..=1.0).contains(&self.refresh_probability) {
            return Err(GuardError::invalid(
                "refresh_probability must be within 0.0..=1.0",
            ));
        }
        positive(self.batch_size as u64, "batch_size")
    }
}

fn positive(value: u64, name: &str) -> Result<()> {
    if value == 0 {
        return Err(GuardError::invalid(format!("{} must be positive", name)));
    }
    Ok(())
}

fn positive_duration(value: Duration, name: &str) -> Result<()> {
    if value.is_zero() {
        return Err(GuardError::invalid(format!("{} must be positive", name)));
    }
    Ok(())
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
