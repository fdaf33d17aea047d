// src/storage/scripts.rs

//! Multi-step operations that a backend must run as one indivisible step.
//!
//! Each script is a small portable algorithm. The Redis backend runs the Lua
//! body through `EVALSHA`; the memory backend runs the Rust equivalent while
//! holding its write lock.

/// Scripts understood by every [`StorageBackend`](super::StorageBackend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScript {
    /// KEYS: bucket. ARGV: capacity, refill_rate, interval_ms, now_ms, ttl_ms.
    /// Returns the tokens left after consuming one, or -1 when denied.
    TokenBucket,

    /// KEYS: set. ARGV: cutoff_ms, now_ms, member, limit, ttl_ms. Trims
    /// members scored at or below the cutoff, adds `member` scored `now` and
    /// reads the cardinality. Past `limit` the new member is removed again.
    /// Returns the cardinality including the new member.
    SlidingWindow,

    /// KEYS: lock. ARGV: owner token. Deletes the key only if it holds the
    /// token; returns 1 when deleted, else 0.
    ReleaseLock,

    /// KEYS: lock. ARGV: owner token, ttl_ms. Re-arms the TTL only if the key
    /// holds the token; returns 1 when extended, else 0.
    ExtendLock,
}

impl StoreScript {
    pub fn name(&self) -> &'static str {
        match self {
            StoreScript::TokenBucket => "token_bucket",
            StoreScript::SlidingWindow => "sliding_window",
            StoreScript::ReleaseLock => "release_lock",
            StoreScript::ExtendLock => "extend_lock",
        }
    }

    pub fn lua(&self) -> &'static str {
        match self {
            StoreScript::TokenBucket => TOKEN_BUCKET_LUA,
            StoreScript::SlidingWindow => SLIDING_WINDOW_LUA,
            StoreScript::ReleaseLock => RELEASE_LOCK_LUA,
            StoreScript::ExtendLock => EXTEND_LOCK_LUA,
        }
    }

    pub(crate) fn expected_args(&self) -> (usize, usize) {
        match self {
            StoreScript::TokenBucket => (1, 5),
            StoreScript::SlidingWindow => (1, 5),
            StoreScript::ReleaseLock => (1, 1),
            StoreScript::ExtendLock => (1, 2),
        }
    }
}

const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local interval = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
local bucket = redis.call('HMGET', key, 'tokens', 'last')
local tokens = tonumber(bucket[1]) or capacity
local last = tonumber(bucket[2]) or now
if now < last then
  last = now
end
local periods = math.floor((now - last) / interval)
tokens = math.min(capacity, tokens + periods * refill_rate)
if tokens >= capacity then
  last = now
else
  last = last + periods * interval
end
local result = -1
if tokens > 0 then
  tokens = tokens - 1
  result = tokens
end
redis.call('HSET', key, 'tokens', tokens, 'last', last)
redis.call('PEXPIRE', key, ttl)
return result
"#;

const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local cutoff = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local member = ARGV[3]
local limit = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff)
redis.call('ZADD', key, now, member)
local count = redis.call('ZCARD', key)
if count > limit then
  redis.call('ZREM', key, member)
end
redis.call('PEXPIRE', key, ttl)
return count
"#;

const RELEASE_LOCK_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const EXTEND_LOCK_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Stored bucket state: tokens left and the time refills are counted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketState {
    pub tokens: i64,
    pub last_refill: i64,
}

/// Rust twin of [`TOKEN_BUCKET_LUA`].
///
/// `last_refill` only advances by whole intervals, so calls arriving faster
/// than `interval` do not discard partial refill progress.
pub(crate) fn token_bucket_step(
    state: Option<BucketState>,
    capacity: i64,
    refill_rate: i64,
    interval: i64,
    now: i64,
) -> (BucketState, i64) {
    let BucketState {
        tokens,
        mut last_refill,
    } = state.unwrap_or(BucketState {
        tokens: capacity,
        last_refill: now,
    });

    if now < last_refill {
        last_refill = now;
    }

    let periods = (now - last_refill) / interval;
    let mut tokens = capacity.min(tokens.saturating_add(periods.saturating_mul(refill_rate)));

    if tokens >= capacity {
        last_refill = now;
    } else {
        last_refill += periods * interval;
    }

    let result = if tokens > 0 {
        tokens -= 1;
        tokens
    } else {
        -1
    };

    (
        BucketState {
            tokens,
            last_refill,
        },
        result,
    )
}
