#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use cacher_core::proto::{FILE_DESCRIPTOR_SET, cacher_server::CacherServer};
use clap::Parser;
use core::time::Duration;
use futures::Stream;
use server::{
    config::{CacheBackend, CliArgs, ServerConfig},
    fetch::{
        origin::{HttpOrigin, Origin},
        store::{CacheStore, MemoryStore},
    },
    service::handler::CacheService,
    telemetry::{TelemetryProviders, init_telemetry},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    signal,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How often the in-memory store drops expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, config).await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, config).await
    }
}

async fn build_store(
    config: &ServerConfig,
    shutdown: &CancellationToken,
) -> anyhow::Result<Arc<dyn CacheStore>> {
    match config.cache_backend {
        CacheBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let _sweeper = store.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());
            Ok(store)
        }
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            let store = server::fetch::redis::RedisStore::connect(&config.redis_url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => {
            anyhow::bail!(
                "CACHE_BACKEND=redis ({}) requires building with the `redis` feature",
                config.redis_url
            )
        }
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let shutdown_token = CancellationToken::new();
    let store = build_store(&config, &shutdown_token).await?;
    let origin: Arc<dyn Origin> = Arc::new(
        HttpOrigin::new(&config.origin).context("failed to build the origin HTTP client")?,
    );

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<CacherServer<CacheService>>()
        .await;

    let service = CacheService::new(config.clone(), store, origin, shutdown_token);

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .http2_keepalive_interval(Some(config.keepalive))
        .max_concurrent_streams(Some(config.max_concurrent_streams))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_cacher_service(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting cache service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting cache service on {} with {} resources, {} units per request",
            addr,
            config.pool.len(),
            config.fanout_width
        );
    }

    if config.ttl_is_inverted() {
        tracing::warn!(
            min_timeout = config.ttl.min_secs,
            max_timeout = config.ttl.max_secs,
            "MIN_TIMEOUT exceeds MAX_TIMEOUT; the bounds are swapped when sampling"
        );
    }
}

fn build_cacher_service(service: CacheService) -> CacherServer<CacheService> {
    CacherServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    service: CacheService,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<CacherServer<CacheService>>()
        .await;

    // 2. Drain, then cancel whatever is still running
    service.shutdown().await;

    // 3. Flush exporters
    providers.shutdown();
}
