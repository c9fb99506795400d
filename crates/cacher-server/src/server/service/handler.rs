//! gRPC service implementation for streaming random cached resources.
//!
//! [`CacheService`] implements the [`Cacher`] service from the protobuf
//! definition. Each `GetRandomDataStream` call runs one fan-out round on a
//! background task and streams the round's results back as they arrive.
//!
//! ## Responsibilities
//!
//! - Refuse new streams once shutdown has started.
//! - Run each round under a child of the service-wide cancellation token.
//! - Track in-flight streams so shutdown can drain them.
//! - Report request, stream and round metrics.

use crate::server::{
    config::ServerConfig,
    fetch::{cache_aside::CacheAsideFetcher, origin::Origin, store::CacheStore},
    locks::registry::KeyLockRegistry,
    random::{RandSource, ThreadRandom},
    streaming::coordinator::RequestCoordinator,
    telemetry::{
        decrement_streams_inflight, increment_requests, increment_stream_errors,
        increment_streams_inflight, increment_units_failed, record_stream_duration,
    },
};
use cacher_core::{
    Error,
    proto::{CacheData, Nothing, cacher_server::Cacher},
};
use core::{pin::Pin, time::Duration};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::Instrument;

#[derive(Debug, Default)]
struct ServiceState {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
    stream_errors: AtomicUsize,
}

impl ServiceState {
    /// Counts a refused or failed stream exactly once.
    fn record_stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::AcqRel);
        increment_stream_errors();
    }
}

/// Counts a stream as in flight for as long as it is alive.
struct InflightStream(Arc<ServiceState>);

impl InflightStream {
    fn enter(state: &Arc<ServiceState>) -> Self {
        state.streams_inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self(Arc::clone(state))
    }
}

impl Drop for InflightStream {
    fn drop(&mut self) {
        self.0.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

/// gRPC service streaming random selections from the resource pool.
///
/// Cloning is cheap; clones share the coordinator, the in-flight counters and
/// the shutdown token.
#[derive(Clone)]
pub struct CacheService {
    config: ServerConfig,
    coordinator: Arc<RequestCoordinator>,
    state: Arc<ServiceState>,
    shutdown_token: CancellationToken,
}

impl CacheService {
    /// Wires the lock registry, the cache-aside fetcher and the coordinator
    /// for the configured pool.
    ///
    /// Cancelling `shutdown_token` cancels every running round.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn Origin>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let rand: Arc<dyn RandSource> = Arc::new(ThreadRandom);
        let locks = Arc::new(KeyLockRegistry::new(&config.pool));
        let fetcher = Arc::new(CacheAsideFetcher::new(
            store,
            origin,
            config.ttl,
            Arc::clone(&rand),
        ));
        let coordinator = RequestCoordinator::new(
            Arc::clone(&config.pool),
            locks,
            fetcher,
            rand,
            config.handoff_buffer_size,
            config.unit_grace,
        );

        Self {
            config,
            coordinator: Arc::new(coordinator),
            state: Arc::new(ServiceState::default()),
            shutdown_token,
        }
    }

    pub fn streams_inflight(&self) -> usize {
        self.state.streams_inflight.load(Ordering::Acquire)
    }

    /// Streams refused or ended by an error since startup.
    pub fn stream_errors(&self) -> usize {
        self.state.stream_errors.load(Ordering::Acquire)
    }

    fn is_shutting_down(&self) -> bool {
        self.state.shutting_down.load(Ordering::Acquire) || self.shutdown_token.is_cancelled()
    }

    async fn wait_for_streams(&self, limit: Duration) -> bool {
        timeout(limit, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Shuts the service down gracefully.
    ///
    /// New streams are refused right away. In-flight streams get up to
    /// `shutdown_timeout` to finish on their own, after which their rounds
    /// are cancelled and given the unit grace period to unwind.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new requests");
        self.state.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Let in-flight streams drain ===
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        if self.wait_for_streams(self.config.shutdown_timeout).await {
            tracing::debug!("All in-flight streams drained successfully");
        } else {
            tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            );
        }

        // === Phase 2: Cancel whatever is left ===
        tracing::debug!("Cancelling remaining rounds via shutdown token");
        self.shutdown_token.cancel();

        // Rounds abort their units after the grace period, so this only
        // needs a little slack on top.
        let limit = self.config.unit_grace + Duration::from_millis(500);
        if !self.wait_for_streams(limit).await {
            tracing::error!(
                "{} streams still active after cancellation",
                self.streams_inflight()
            );
        }
    }
}

#[tonic::async_trait]
impl Cacher for CacheService {
    type GetRandomDataStreamStream = Pin<Box<dyn Stream<Item = Result<CacheData, Status>> + Send>>;

    /// Streams up to `NUMBER_OF_REQUESTS` randomly drawn resources.
    ///
    /// The stream ends once every unit of the round has finished. Failed
    /// fetches are left out, so fewer items than requested may arrive.
    #[tracing::instrument(skip_all, fields(remote_addr = tracing::field::Empty))]
    async fn get_random_data_stream(
        &self,
        req: Request<Nothing>,
    ) -> Result<Response<Self::GetRandomDataStreamStream>, Status> {
        if let Some(addr) = req.remote_addr() {
            tracing::Span::current().record("remote_addr", tracing::field::display(addr));
        }

        if self.is_shutting_down() {
            self.state.record_stream_error();
            return Err(Error::ServiceShutdown.into());
        }

        increment_requests();
        let start = Instant::now();
        let inflight = InflightStream::enter(&self.state);
        let width = self.config.fanout_width;

        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<CacheData, Status>>(self.config.stream_buffer_size);

        let coordinator = Arc::clone(&self.coordinator);
        let state = Arc::clone(&self.state);
        let cancel = self.shutdown_token.child_token();

        let round = async move {
            let _inflight = inflight;
            match coordinator.run_round(width, resp_tx, cancel).await {
                Ok(report) => {
                    increment_units_failed(report.failed as u64);
                    record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
                }
                Err(e) => {
                    // The caller may also see this as a status item; it is
                    // only counted here.
                    state.record_stream_error();
                    tracing::warn!("Round failed: {e}");
                }
            }
        }
        .instrument(tracing::info_span!("round", width));

        tokio::spawn(round);

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}
