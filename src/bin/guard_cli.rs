// src/bin/guard_cli.rs

use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use valkey_guard::algorithms::{
    Debounce, FixedWindow, RateLimitAlgorithm, SlidingWindow, Throttle, TokenBucket,
};
use valkey_guard::cache::{CachePolicy, FifoCache, LfuCache, LifoCache, LruCache, MruCache};
use valkey_guard::config::{
    CacheConfig, DebounceConfig, FixedWindowConfig, InMemoryConfig, RedisConfig,
    SlidingWindowConfig, ThrottleConfig, TokenBucketConfig,
};
use valkey_guard::storage::{MemoryStorage, RedisStorage, StorageBackend};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "guard_cli",
    about = "Drive rate limiters and eviction caches against a store"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Simulate traffic against one rate limiter
    Limit(LimitOpt),
    /// Replay a sequence of cache operations against one eviction policy
    Cache(CacheOpt),
}

#[derive(Debug, StructOpt)]
struct LimitOpt {
    /// Rate limiting algorithm to use
    #[structopt(short, long, possible_values = &["fixed_window", "sliding_window", "token_bucket", "throttle", "debounce"], default_value = "fixed_window")]
    algorithm: String,

    /// Key to use for rate limiting
    #[structopt(short, long, default_value = "default_user")]
    key: String,

    /// Requests admitted per window (bucket capacity for token_bucket)
    #[structopt(short, long, default_value = "10")]
    limit: u64,

    /// Window, refill interval or suppression interval in milliseconds
    #[structopt(short, long, default_value = "1000")]
    window_ms: u64,

    /// Tokens added per interval for token_bucket
    #[structopt(long, default_value = "1")]
    refill_rate: u64,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "sine_wave"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (steady and sine_wave modes)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Delete the key's state before starting
    #[structopt(long)]
    reset: bool,
}

#[derive(Debug, StructOpt)]
struct CacheOpt {
    /// Eviction policy
    #[structopt(short, long, possible_values = &["fifo", "lifo", "lru", "mru", "lfu"], default_value = "lru")]
    policy: String,

    /// Maximum number of entries
    #[structopt(short, long, default_value = "2")]
    capacity: usize,

    /// Namespace for the cache keys
    #[structopt(long, default_value = "cli_cache")]
    namespace: String,

    /// Operations, e.g. `a b get:a c del:b`; a bare key is a set
    #[structopt(required = true)]
    operations: Vec<String>,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        EnvFilter::new("guard_cli=error,valkey_guard=error")
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("guard_cli={},valkey_guard={}", log_level, log_level))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match opt.storage.as_str() {
        "memory" => {
            let storage = MemoryStorage::new(InMemoryConfig {
                use_background_task: true,
                ..InMemoryConfig::default()
            });
            dispatch(&opt, storage).await
        }
        "redis" => {
            let storage = RedisStorage::new(RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(2),
                command_timeout: Duration::from_secs(5),
            })
            .await?;
            storage.ping().await?;
            info!(url = %opt.redis_url, "Connected to Redis");
            dispatch(&opt, storage).await
        }
        other => Err(format!("Unknown storage backend: {}", other).into()),
    }
}

async fn dispatch<S>(opt: &Opt, storage: S) -> CliResult<()>
where
    S: StorageBackend + Clone + 'static,
{
    match &opt.command {
        Command::Limit(limit) => {
            let limiter = build_limiter(limit, storage)?;
            if limit.reset {
                limiter.reset(&limit.key).await?;
            }
            info!(
                algorithm = limiter.name(),
                limit = limit.limit,
                window_ms = limit.window_ms,
                "Running {} simulation",
                limit.simulation
            );
            simulate(limit, limiter.as_ref()).await
        }
        Command::Cache(cache) => replay_cache(cache, storage).await,
    }
}

fn build_limiter<S>(opt: &LimitOpt, storage: S) -> CliResult<Box<dyn RateLimitAlgorithm>>
where
    S: StorageBackend + Clone + 'static,
{
    let window = Duration::from_millis(opt.window_ms);
    let limiter: Box<dyn RateLimitAlgorithm> = match opt.algorithm.as_str() {
        "fixed_window" => Box::new(FixedWindow::new(
            storage,
            FixedWindowConfig {
                limit: opt.limit,
                window,
            },
        )?),
        "sliding_window" => Box::new(SlidingWindow::new(
            storage,
            SlidingWindowConfig {
                limit: opt.limit,
                window,
            },
        )?),
        "token_bucket" => Box::new(TokenBucket::new(
            storage,
            TokenBucketConfig {
                capacity: opt.limit,
                refill_rate: opt.refill_rate,
                interval: window,
            },
        )?),
        "throttle" => Box::new(Throttle::new(storage, ThrottleConfig { interval: window })?),
        "debounce" => Box::new(Debounce::new(
            storage,
            DebounceConfig {
                interval: window,
                rearm_on_suppressed: true,
            },
        )?),
        other => return Err(format!("Unknown algorithm: {}", other).into()),
    };
    Ok(limiter)
}

async fn simulate(opt: &LimitOpt, limiter: &dyn RateLimitAlgorithm) -> CliResult<()> {
    let base_interval = Duration::from_millis(opt.request_interval_ms);
    let mut allowed_count = 0;
    let mut denied_count = 0;
    let mut degraded_count = 0;
    let start_time = Instant::now();

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let status = limiter.check(&opt.key).await?;

        if status.degraded {
            degraded_count += 1;
        }
        if status.allowed {
            allowed_count += 1;
            info!("Request {}: ALLOWED (remaining: {})", i + 1, status.remaining);
        } else {
            denied_count += 1;
            warn!("Request {}: DENIED", i + 1);
        }

        let pause = match opt.simulation.as_str() {
            "burst" => continue,
            "steady" => base_interval,
            // Full cycle over the run, between 0.5x and 1.5x the base interval
            _ => {
                let phase = (i as f64 * std::f64::consts::PI * 2.0) / (opt.num_requests as f64);
                base_interval.mul_f64(1.0 + 0.5 * phase.sin())
            }
        };
        let elapsed = request_time.elapsed();
        if elapsed < pause {
            time::sleep(pause - elapsed).await;
        }
    }

    println!("\n{} Simulation Results:", opt.simulation);
    println!("---------------------------");
    println!("Algorithm: {}", limiter.name());
    println!("Total requests: {}", opt.num_requests);
    println!("Allowed: {}", allowed_count);
    println!("Denied: {}", denied_count);
    println!("Decided by failure policy: {}", degraded_count);
    println!("Time elapsed: {:?}", start_time.elapsed());

    Ok(())
}

async fn replay_cache<S>(opt: &CacheOpt, storage: S) -> CliResult<()>
where
    S: StorageBackend + Clone + 'static,
{
    let config = CacheConfig::new(opt.namespace.clone(), opt.capacity);
    let cache: Box<dyn CachePolicy> = match opt.policy.as_str() {
        "fifo" => Box::new(FifoCache::new(storage, config)?),
        "lifo" => Box::new(LifoCache::new(storage, config)?),
        "lru" => Box::new(LruCache::new(storage, config)?),
        "mru" => Box::new(MruCache::new(storage, config)?),
        "lfu" => Box::new(LfuCache::new(storage, config)?),
        other => return Err(format!("Unknown policy: {}", other).into()),
    };

    cache.clear().await?;
    println!("Policy: {} (capacity {})", cache.name(), opt.capacity);

    for operation in &opt.operations {
        if let Some(key) = operation.strip_prefix("get:") {
            let value = cache.get(key).await?;
            let shown = value
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|| "<miss>".to_string());
            println!("get {:<10} -> {}", key, shown);
        } else if let Some(key) = operation.strip_prefix("del:") {
            let existed = cache.delete(key).await?;
            println!("del {:<10} -> {}", key, if existed { "deleted" } else { "absent" });
        } else {
            let evicted = cache.set(operation, operation.as_bytes(), None).await?;
            match evicted {
                Some(victim) => println!("set {:<10} -> evicted {}", operation, victim),
                None => println!("set {:<10}", operation),
            }
        }
        println!("    tracked: {:?}", cache.keys().await?);
    }

    Ok(())
}
