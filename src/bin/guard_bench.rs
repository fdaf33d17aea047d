// src/bin/guard_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use valkey_guard::algorithms::{
    Debounce, FixedWindow, RateLimitAlgorithm, SlidingWindow, Throttle, TokenBucket,
};
use valkey_guard::config::{
    DebounceConfig, FixedWindowConfig, InMemoryConfig, RedisConfig, SlidingWindowConfig,
    ThrottleConfig, TokenBucketConfig,
};
use valkey_guard::storage::{MemoryStorage, RedisStorage, StorageBackend};

type BenchResult<T> = Result<T, Box<dyn std::error::Error>>;

const ALGORITHMS: [&str; 5] = [
    "fixed_window",
    "sliding_window",
    "token_bucket",
    "throttle",
    "debounce",
];

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "guard_bench",
    about = "Concurrent benchmark of the rate limiting algorithms"
)]
struct Opt {
    /// Rate limiting algorithm to benchmark
    #[structopt(short, long, possible_values = &["fixed_window", "sliding_window", "token_bucket", "throttle", "debounce", "all"], default_value = "all")]
    algorithm: String,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Requests admitted per window (bucket capacity for token_bucket)
    #[structopt(short, long, default_value = "1000")]
    limit: u64,

    /// Window, refill interval or suppression interval in milliseconds
    #[structopt(short, long, default_value = "60000")]
    window_ms: u64,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Maximum number of in-flight requests
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Totals for one algorithm run
#[derive(Debug, Default, Clone)]
struct RunStats {
    allowed: u64,
    denied: u64,
    degraded: u64,
    errors: u64,
    max_latency: Duration,
    total_latency: Duration,
    elapsed: Duration,
}

impl RunStats {
    fn requests(&self) -> u64 {
        self.allowed + self.denied + self.errors
    }

    fn merge(&mut self, other: &RunStats) {
        self.allowed += other.allowed;
        self.denied += other.denied;
        self.degraded += other.degraded;
        self.errors += other.errors;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
    }
}

#[tokio::main]
async fn main() -> BenchResult<()> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        EnvFilter::new("guard_bench=error,valkey_guard=error")
    } else {
        let log_level = match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(format!("guard_bench={},valkey_guard={}", log_level, log_level))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let algorithms: Vec<&str> = if opt.algorithm == "all" {
        ALGORITHMS.to_vec()
    } else {
        vec![opt.algorithm.as_str()]
    };

    let results = match opt.storage.as_str() {
        "memory" => {
            let storage = MemoryStorage::new(InMemoryConfig {
                max_entries: 1_000_000,
                use_background_task: true,
                cleanup_interval: Duration::from_secs(60),
            });
            run_all(&opt, &algorithms, storage, stop).await?
        }
        "redis" => {
            let storage = RedisStorage::new(RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(5),
            })
            .await?;
            storage.ping().await?;
            run_all(&opt, &algorithms, storage, stop).await?
        }
        other => return Err(format!("Unknown storage backend: {}", other).into()),
    };

    print_summary(&opt, &results);
    Ok(())
}

async fn run_all<S>(
    opt: &Opt,
    algorithms: &[&str],
    storage: S,
    stop: Arc<AtomicBool>,
) -> BenchResult<Vec<(String, RunStats)>>
where
    S: StorageBackend + Clone + 'static,
{
    let mut results = Vec::with_capacity(algorithms.len());
    for name in algorithms {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, skipping remaining algorithms");
            break;
        }
        let limiter: Arc<dyn RateLimitAlgorithm> =
            Arc::from(build_limiter(opt, name, storage.clone())?);
        info!(algorithm = name, users = opt.num_users, "Starting benchmark");
        let stats = run_benchmark(opt, limiter, stop.clone()).await?;
        results.push((name.to_string(), stats));
    }
    Ok(results)
}

fn build_limiter<S>(opt: &Opt, name: &str, storage: S) -> BenchResult<Box<dyn RateLimitAlgorithm>>
where
    S: StorageBackend + Clone + 'static,
{
    let window = Duration::from_millis(opt.window_ms);
    let limiter: Box<dyn RateLimitAlgorithm> = match name {
        "fixed_window" => Box::new(
            FixedWindow::new(
                storage,
                FixedWindowConfig {
                    limit: opt.limit,
                    window,
                },
            )?
            .with_key_prefix("bench"),
        ),
        "sliding_window" => Box::new(
            SlidingWindow::new(
                storage,
                SlidingWindowConfig {
                    limit: opt.limit,
                    window,
                },
            )?
            .with_key_prefix("bench"),
        ),
        "token_bucket" => Box::new(
            TokenBucket::new(
                storage,
                TokenBucketConfig {
                    capacity: opt.limit,
                    refill_rate: opt.limit,
                    interval: window,
                },
            )?
            .with_key_prefix("bench"),
        ),
        "throttle" => Box::new(
            Throttle::new(storage, ThrottleConfig { interval: window })?.with_key_prefix("bench"),
        ),
        "debounce" => Box::new(
            Debounce::new(
                storage,
                DebounceConfig {
                    interval: window,
                    rearm_on_suppressed: true,
                },
            )?
            .with_key_prefix("bench"),
        ),
        other => return Err(format!("Unknown algorithm: {}", other).into()),
    };
    Ok(limiter)
}

async fn run_benchmark(
    opt: &Opt,
    limiter: Arc<dyn RateLimitAlgorithm>,
    stop: Arc<AtomicBool>,
) -> BenchResult<RunStats> {
    for user_id in 0..opt.num_users {
        limiter.reset(&format!("user_{}", user_id)).await?;
    }

    let total = (opt.num_users * opt.requests_per_user) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template(
            "{msg:>16} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec})",
        )?
        .progress_chars("#>-"),
    );
    progress.set_message(limiter.name());

    let barrier = Arc::new(Barrier::new(opt.num_users));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let start_time = Instant::now();
    let mut handles = Vec::with_capacity(opt.num_users);

    for user_id in 0..opt.num_users {
        let limiter = limiter.clone();
        let barrier = barrier.clone();
        let semaphore = semaphore.clone();
        let progress = progress.clone();
        let stop = stop.clone();
        let key = format!("user_{}", user_id);
        let requests = opt.requests_per_user;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut stats = RunStats::default();

            for _ in 0..requests {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(_permit) = semaphore.acquire().await else {
                    break;
                };

                let started = Instant::now();
                let outcome = limiter.check(&key).await;
                let latency = started.elapsed();
                stats.total_latency += latency;
                stats.max_latency = stats.max_latency.max(latency);

                match outcome {
                    Ok(status) => {
                        if status.degraded {
                            stats.degraded += 1;
                        }
                        if status.allowed {
                            stats.allowed += 1;
                        } else {
                            stats.denied += 1;
                        }
                    }
                    Err(err) => {
                        stats.errors += 1;
                        warn!(key = %key, error = %err, "Rate limit check failed");
                    }
                }
                progress.inc(1);
            }
            stats
        }));
    }

    let mut totals = RunStats::default();
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(stats) => totals.merge(&stats),
            Err(err) => warn!(error = %err, "Benchmark task panicked"),
        }
    }
    totals.elapsed = start_time.elapsed();

    if stop.load(Ordering::SeqCst) {
        progress.abandon_with_message(format!("{} (interrupted)", limiter.name()));
    } else {
        progress.finish_with_message(limiter.name());
    }
    Ok(totals)
}

fn print_summary(opt: &Opt, results: &[(String, RunStats)]) {
    let mut table = Table::new();
    table.add_row(row![
        "Algorithm",
        "Requests",
        "Allowed",
        "Denied",
        "Fail-open",
        "Errors",
        "Avg latency",
        "Max latency",
        "Throughput"
    ]);

    for (name, stats) in results {
        let requests = stats.requests();
        let avg_latency = if requests == 0 {
            Duration::ZERO
        } else {
            stats.total_latency / requests as u32
        };
        let throughput = if stats.elapsed.is_zero() {
            0.0
        } else {
            requests as f64 / stats.elapsed.as_secs_f64()
        };

        table.add_row(row![
            name,
            requests,
            stats.allowed,
            stats.denied,
            stats.degraded,
            stats.errors,
            format!("{:?}", avg_latency),
            format!("{:?}", stats.max_latency),
            format!("{:.0} req/s", throughput)
        ]);
    }

    println!(
        "\nBenchmark: {} users x {} requests, limit {} per {}ms, {} backend",
        opt.num_users, opt.requests_per_user, opt.limit, opt.window_ms, opt.storage
    );
    table.printstd();
}
