use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use seqd_core::types::DEFAULT_NAMESPACE;

/// Runtime configuration for the `seqd-server` binary.
///
/// These settings control where the service listens, which stores it talks
/// to, and how aggressively each bucket's buffer is kept topped up. All
/// values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for a single-node
/// deployment next to a local Redis and MySQL.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqd-server",
    version,
    about = "A TCP service issuing unique per-bucket sequence IDs"
)]
pub struct CliArgs {
    /// TCP address to accept client connections on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:6381"))]
    pub listen_addr: String,

    /// Redis URL of the fast store holding the per-bucket buffers.
    ///
    /// Environment variable: `FAST_STORE_URL`
    #[arg(long, env = "FAST_STORE_URL", default_value_t = String::from("redis://127.0.0.1:6379"))]
    pub fast_store_url: String,

    /// Maximum number of pooled fast-store connections. Each checkout is
    /// validated with a `PING`.
    ///
    /// Environment variable: `FAST_STORE_POOL_SIZE`
    #[arg(long, env = "FAST_STORE_POOL_SIZE", default_value_t = 3)]
    pub fast_store_pool_size: u32,

    /// MySQL DSN of the durable store holding the per-bucket counters.
    ///
    /// Environment variable: `DURABLE_STORE_DSN`
    #[arg(
        long,
        env = "DURABLE_STORE_DSN",
        default_value_t = String::from("mysql://root@127.0.0.1:3306/test")
    )]
    pub durable_store_dsn: String,

    /// Maximum number of pooled durable-store connections.
    ///
    /// Environment variable: `DURABLE_STORE_POOL_SIZE`
    #[arg(long, env = "DURABLE_STORE_POOL_SIZE", default_value_t = 100)]
    pub durable_store_pool_size: u32,

    /// Table holding one `(app, bucket, seq)` row per bucket.
    ///
    /// Environment variable: `DURABLE_TABLE`
    #[arg(long, env = "DURABLE_TABLE", default_value_t = String::from("seq"))]
    pub durable_table: String,

    /// Prefix of every fast-store key (`<namespace>:<app>:<bucket>`).
    ///
    /// Environment variable: `KEY_NAMESPACE`
    #[arg(long, env = "KEY_NAMESPACE", default_value_t = String::from(DEFAULT_NAMESPACE))]
    pub key_namespace: String,

    /// Buffer depth below which a bucket's monitor refills it.
    ///
    /// Environment variable: `LOW_WATERMARK`
    #[arg(long, env = "LOW_WATERMARK", default_value_t = 5)]
    pub low_watermark: usize,

    /// Interval between two checks of the same bucket, in milliseconds.
    ///
    /// Environment variable: `TICK_INTERVAL_MS`
    #[arg(long, env = "TICK_INTERVAL_MS", default_value_t = 100)]
    pub tick_interval_ms: u64,

    /// A bucket not requested for longer than this stops being monitored.
    ///
    /// Environment variable: `IDLE_THRESHOLD_SECS`
    #[arg(long, env = "IDLE_THRESHOLD_SECS", default_value_t = 60)]
    pub idle_threshold_secs: u64,

    /// Refill size used when a request carries no `Step` (or `Step: 0`).
    ///
    /// Environment variable: `DEFAULT_STEP`
    #[arg(long, env = "DEFAULT_STEP", default_value_t = 100)]
    pub default_step: u64,

    /// Largest `Step` a client may ask for. Larger requests close the
    /// connection.
    ///
    /// Environment variable: `MAX_STEP`
    #[arg(long, env = "MAX_STEP", default_value_t = 1_000_000)]
    pub max_step: u64,

    /// A connection that sends no complete line within this many
    /// milliseconds is closed.
    ///
    /// Environment variable: `SESSION_IDLE_TIMEOUT_MS`
    #[arg(long, env = "SESSION_IDLE_TIMEOUT_MS", default_value_t = 2_000)]
    pub session_idle_timeout_ms: u64,

    /// Longest request line accepted, in bytes.
    ///
    /// Environment variable: `MAX_LINE_BYTES`
    #[arg(long, env = "MAX_LINE_BYTES", default_value_t = 4096)]
    pub max_line_bytes: usize,

    /// Upper bound of the delay between refill retries after consecutive
    /// failures, in milliseconds.
    ///
    /// Environment variable: `REFILL_BACKOFF_MAX_MS`
    #[arg(long, env = "REFILL_BACKOFF_MAX_MS", default_value_t = 5_000)]
    pub refill_backoff_max_ms: u64,

    /// Number of consecutive refill failures after which a bucket is
    /// reported at `error` level.
    ///
    /// Environment variable: `REFILL_ALERT_AFTER`
    #[arg(long, env = "REFILL_ALERT_AFTER", default_value_t = 10)]
    pub refill_alert_after: u32,
}

/// Settings the engine and the session layer need at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub low_watermark: usize,
    pub tick_interval: Duration,
    pub idle_threshold: Duration,
    pub default_step: u64,
    pub max_step: u64,
    pub session_idle_timeout: Duration,
    pub max_line_bytes: usize,
    pub refill_backoff_max: Duration,
    pub refill_alert_after: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_watermark: 5,
            tick_interval: Duration::from_millis(100),
            idle_threshold: Duration::from_secs(60),
            default_step: 100,
            max_step: 1_000_000,
            session_idle_timeout: Duration::from_secs(2),
            max_line_bytes: 4096,
            refill_backoff_max: Duration::from_secs(5),
            refill_alert_after: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub fast_store_url: String,
    pub fast_store_pool_size: u32,
    pub durable_store_dsn: String,
    pub durable_store_pool_size: u32,
    pub durable_table: String,
    pub key_namespace: String,
    pub engine: EngineConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.fast_store_pool_size == 0 {
            bail!("FAST_STORE_POOL_SIZE must be greater than 0");
        }
        if args.durable_store_pool_size == 0 {
            bail!("DURABLE_STORE_POOL_SIZE must be greater than 0");
        }
        if args.key_namespace.is_empty() {
            bail!("KEY_NAMESPACE must not be empty");
        }
        if args.durable_table.is_empty()
            || !args
                .durable_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!(
                "DURABLE_TABLE ({:?}) must be a plain identifier of [A-Za-z0-9_]",
                args.durable_table
            );
        }
        if args.low_watermark == 0 {
            bail!("LOW_WATERMARK must be greater than 0");
        }
        if args.tick_interval_ms == 0 {
            bail!("TICK_INTERVAL_MS must be greater than 0");
        }
        if args.idle_threshold_secs == 0 {
            bail!("IDLE_THRESHOLD_SECS must be greater than 0");
        }
        if args.default_step == 0 || args.max_step == 0 {
            bail!("DEFAULT_STEP and MAX_STEP must be greater than 0");
        }
        if args.default_step > args.max_step {
            bail!(
                "DEFAULT_STEP ({}) exceeds MAX_STEP ({})",
                args.default_step,
                args.max_step
            );
        }
        if args.session_idle_timeout_ms == 0 {
            bail!("SESSION_IDLE_TIMEOUT_MS must be greater than 0");
        }
        if args.max_line_bytes == 0 {
            bail!("MAX_LINE_BYTES must be greater than 0");
        }

        let engine = EngineConfig {
            low_watermark: args.low_watermark,
            tick_interval: Duration::from_millis(args.tick_interval_ms),
            idle_threshold: Duration::from_secs(args.idle_threshold_secs),
            default_step: args.default_step,
            max_step: args.max_step,
            session_idle_timeout: Duration::from_millis(args.session_idle_timeout_ms),
            max_line_bytes: args.max_line_bytes,
            refill_backoff_max: Duration::from_millis(args.refill_backoff_max_ms)
                .max(Duration::from_millis(args.tick_interval_ms)),
            refill_alert_after: args.refill_alert_after.max(1),
        };

        Ok(Self {
            listen_addr: args.listen_addr,
            fast_store_url: args.fast_store_url,
            fast_store_pool_size: args.fast_store_pool_size,
            durable_store_dsn: args.durable_store_dsn,
            durable_store_pool_size: args.durable_store_pool_size,
            durable_table: args.durable_table,
            key_namespace: args.key_namespace,
            engine,
        })
    }
}
