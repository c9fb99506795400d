use super::{
    aggregator::{RoundReport, StreamingAggregator},
    processor::process_unit,
};
use crate::server::{
    fetch::cache_aside::CacheAsideFetcher, locks::registry::KeyLockRegistry, pool::ResourcePool,
    random::RandSource,
};
use cacher_core::{Result, proto::CacheData};
use core::time::Duration;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Fan-out/fan-in engine for "produce a batch" requests.
///
/// Each round spawns one task per slot. Every task draws a resource from the
/// pool (with replacement), fetches it under that resource's lock and hands
/// the outcome to a [`StreamingAggregator`], which streams successes back to
/// the caller.
///
/// `locks` must be built from `pool`; drawing a resource without a lock is a
/// programming error and panics the unit.
pub struct RequestCoordinator {
    pool: Arc<ResourcePool>,
    locks: Arc<KeyLockRegistry>,
    fetcher: Arc<CacheAsideFetcher>,
    rand: Arc<dyn RandSource>,
    handoff_buffer_size: usize,
    unit_grace: Duration,
}

impl RequestCoordinator {
    pub fn new(
        pool: Arc<ResourcePool>,
        locks: Arc<KeyLockRegistry>,
        fetcher: Arc<CacheAsideFetcher>,
        rand: Arc<dyn RandSource>,
        handoff_buffer_size: usize,
        unit_grace: Duration,
    ) -> Self {
        Self {
            pool,
            locks,
            fetcher,
            rand,
            handoff_buffer_size,
            unit_grace,
        }
    }

    /// Runs one round of `width` concurrent units and streams their results
    /// into `resp_tx`.
    ///
    /// # Behavior
    ///
    /// - Results are forwarded as they arrive. Failed units are left out, so
    ///   a round may deliver fewer than `width` items.
    /// - If the caller disconnects, a delivery fails, or `cancel` fires, the
    ///   round stops forwarding and cancels `cancel` so every unit unwinds.
    ///   Units still running after the grace period are aborted.
    /// - `resp_tx` is dropped, ending the caller's stream, only after every
    ///   unit has terminated. This happens exactly once on every path.
    ///
    /// `cancel` should be a child token dedicated to this round.
    ///
    /// # Errors
    ///
    /// Returns the aggregator's error if the round ended early.
    pub async fn run_round(
        &self,
        width: usize,
        resp_tx: mpsc::Sender<Result<CacheData, Status>>,
        cancel: CancellationToken,
    ) -> Result<RoundReport> {
        let picks = self.pool.pick_many(width, self.rand.as_ref());
        let (item_tx, item_rx) = mpsc::channel(self.handoff_buffer_size);

        let mut units = JoinSet::new();
        for (unit_id, resource) in picks.into_iter().enumerate() {
            units.spawn(process_unit(
                unit_id,
                resource,
                Arc::clone(&self.locks),
                Arc::clone(&self.fetcher),
                item_tx.clone(),
                cancel.clone(),
            ));
        }
        // Only the units hold senders now, so the hand-off closes once the
        // last of them is done.
        drop(item_tx);

        let mut aggregator = StreamingAggregator::new(item_rx, resp_tx, cancel.clone());
        let forwarded = aggregator.forward().await;

        if let Err(e) = &forwarded {
            tracing::debug!(error = %e, "Round stopped early, cancelling units");
            cancel.cancel();
            aggregator.close_handoff();
        }

        let lost = settle_units(&mut units, self.unit_grace).await;

        let mut report = aggregator.finish();
        report.requested = width;
        report.failed += lost;

        match forwarded {
            Ok(()) => {
                tracing::debug!(
                    requested = report.requested,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Round complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::info!(
                    requested = report.requested,
                    delivered = report.delivered,
                    failed = report.failed,
                    error = %e,
                    "Round ended early"
                );
                Err(e)
            }
        }
    }
}

/// Waits up to `grace` for every unit to finish, then aborts the rest.
///
/// Returns how many units panicked or had to be aborted. Those never hand
/// off a result, so the aggregator has not counted them.
async fn settle_units(units: &mut JoinSet<()>, grace: Duration) -> usize {
    let mut lost = 0;
    let joined = timeout(grace, async {
        while let Some(res) = units.join_next().await {
            if let Err(e) = res {
                tracing::error!("Unit panicked: {e}");
                lost += 1;
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!(
            remaining = units.len(),
            "Units did not stop within the grace period, aborting"
        );
        units.abort_all();
        while let Some(res) = units.join_next().await {
            if res.is_err() {
                lost += 1;
            }
        }
    }
    lost
}
