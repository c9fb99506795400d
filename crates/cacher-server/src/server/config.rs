use crate::server::{
    fetch::{cache_aside::TtlRange, origin::OriginSettings},
    pool::ResourcePool,
};
use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::{path::PathBuf, sync::Arc};

/// Where cached content lives.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, lost on restart and not shared between replicas.
    Memory,
    /// A Redis server (requires the `redis` feature).
    Redis,
}

/// Runtime configuration for the `cacher-server` binary.
///
/// Every value can be given as a flag or through the environment (a `.env`
/// file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cacher-server",
    version,
    about = "A gRPC service streaming random, cached selections from a fixed resource pool"
)]
pub struct CliArgs {
    /// Resources in the pool. Repeat the flag or pass a comma-separated list.
    ///
    /// Environment variable: `URLS`
    #[arg(long = "url", env = "URLS", value_delimiter = ',')]
    pub urls: Vec<String>,

    /// File with one resource per line. Blank lines and lines starting with
    /// `#` are ignored. Entries are appended after `--url`.
    ///
    /// Environment variable: `URLS_FILE`
    #[arg(long, env = "URLS_FILE")]
    pub urls_file: Option<PathBuf>,

    /// Lower bound, in seconds, for the TTL of newly cached content.
    ///
    /// Environment variable: `MIN_TIMEOUT`
    #[arg(long, env = "MIN_TIMEOUT", default_value_t = 60)]
    pub min_timeout: u64,

    /// Upper bound, in seconds, for the TTL of newly cached content. If it is
    /// below `MIN_TIMEOUT` the two are swapped when sampling.
    ///
    /// Environment variable: `MAX_TIMEOUT`
    #[arg(long, env = "MAX_TIMEOUT", default_value_t = 300)]
    pub max_timeout: u64,

    /// Number of resources drawn (and items streamed, at most) per request.
    ///
    /// Environment variable: `NUMBER_OF_REQUESTS`
    #[arg(long, env = "NUMBER_OF_REQUESTS", default_value_t = 10)]
    pub number_of_requests: usize,

    /// Capacity of the response buffer between a round and the gRPC stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Capacity of the channel units hand their results over.
    ///
    /// Environment variable: `HANDOFF_BUFFER_SIZE`
    #[arg(long, env = "HANDOFF_BUFFER_SIZE", default_value_t = 16)]
    pub handoff_buffer_size: usize,

    /// How long, in milliseconds, units of a cancelled round get to stop on
    /// their own before they are aborted.
    ///
    /// Environment variable: `UNIT_GRACE_MS`
    #[arg(long, env = "UNIT_GRACE_MS", default_value_t = 3000)]
    pub unit_grace_ms: u64,

    /// Seconds to wait for in-flight streams to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Timeout, in milliseconds, for a single origin fetch.
    ///
    /// Environment variable: `ORIGIN_TIMEOUT_MS`
    #[arg(long, env = "ORIGIN_TIMEOUT_MS", default_value_t = 10_000)]
    pub origin_timeout_ms: u64,

    /// Idle origin connections kept per host.
    ///
    /// Environment variable: `ORIGIN_MAX_IDLE`
    #[arg(long, env = "ORIGIN_MAX_IDLE", default_value_t = 30)]
    pub origin_max_idle: usize,

    /// How long, in milliseconds, an idle origin connection is kept.
    ///
    /// Environment variable: `ORIGIN_IDLE_TIMEOUT_MS`
    #[arg(long, env = "ORIGIN_IDLE_TIMEOUT_MS", default_value_t = 1000)]
    pub origin_idle_timeout_ms: u64,

    /// Cache backend.
    ///
    /// Environment variable: `CACHE_BACKEND`
    #[arg(long, env = "CACHE_BACKEND", value_enum, default_value_t = CacheBackend::Memory)]
    pub cache_backend: CacheBackend,

    /// Redis endpoint, used with `--cache-backend redis`.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://127.0.0.1:6379"))]
    pub redis_url: String,

    /// Maximum concurrent HTTP/2 streams per connection.
    ///
    /// Environment variable: `MAX_CONCURRENT_STREAMS`
    #[arg(long, env = "MAX_CONCURRENT_STREAMS", default_value_t = 2000)]
    pub max_concurrent_streams: u32,

    /// Interval, in seconds, between HTTP/2 keepalive pings on idle
    /// connections.
    ///
    /// Environment variable: `KEEPALIVE_SECS`
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 60)]
    pub keepalive_secs: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/cacher.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub pool: Arc<ResourcePool>,
    pub ttl: TtlRange,
    pub fanout_width: usize,
    pub stream_buffer_size: usize,
    pub handoff_buffer_size: usize,
    pub unit_grace: Duration,
    pub shutdown_timeout: Duration,
    pub origin: OriginSettings,
    pub cache_backend: CacheBackend,
    pub redis_url: String,
    pub max_concurrent_streams: u32,
    pub keepalive: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl ServerConfig {
    /// Inverted TTL bounds are accepted, but worth a warning at startup.
    pub fn ttl_is_inverted(&self) -> bool {
        self.ttl.min_secs > self.ttl.max_secs
    }
}

/// Entries of a URL list file: trimmed, without blanks or `#` comments.
fn parse_url_list(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let mut urls: Vec<String> = args
            .urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
            .collect();

        if let Some(path) = &args.urls_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read URLS_FILE `{}`", path.display()))?;
            urls.extend(parse_url_list(&text).map(str::to_owned));
        }

        let Some(pool) = ResourcePool::new(urls) else {
            bail!("the resource pool is empty; set URLS or URLS_FILE");
        };

        if args.number_of_requests == 0 {
            bail!("NUMBER_OF_REQUESTS must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }
        if args.handoff_buffer_size == 0 {
            bail!("HANDOFF_BUFFER_SIZE must be greater than 0");
        }
        if args.unit_grace_ms == 0 {
            bail!("UNIT_GRACE_MS must be greater than 0");
        }

        if args.cache_backend == CacheBackend::Redis && cfg!(not(feature = "redis")) {
            bail!("CACHE_BACKEND=redis requires building with the `redis` feature");
        }

        Ok(Self {
            pool: Arc::new(pool),
            ttl: TtlRange {
                min_secs: args.min_timeout,
                max_secs: args.max_timeout,
            },
            fanout_width: args.number_of_requests,
            stream_buffer_size: args.stream_buffer_size,
            handoff_buffer_size: args.handoff_buffer_size,
            unit_grace: Duration::from_millis(args.unit_grace_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            origin: OriginSettings {
                request_timeout: Duration::from_millis(args.origin_timeout_ms),
                max_idle_per_host: args.origin_max_idle,
                idle_timeout: Duration::from_millis(args.origin_idle_timeout_ms),
            },
            cache_backend: args.cache_backend,
            redis_url: args.redis_url,
            max_concurrent_streams: args.max_concurrent_streams,
            keepalive: Duration::from_secs(args.keepalive_secs),
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
