use super::request::WorkItem;
use crate::server::{fetch::cache_aside::CacheAsideFetcher, locks::registry::KeyLockRegistry};
use cacher_core::types::ResourceId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs one unit of a fan-out round.
///
/// The unit locks `resource`, fetches it through the cache-aside path,
/// releases the lock and hands the outcome to the aggregator over `item_tx`.
///
/// # Cancellation
///
/// Every suspension point (waiting for the lock, the store and origin calls,
/// and the hand-off) races against `cancel`. Once the token fires the unit
/// returns promptly. Dropping the in-progress future drops the
/// [`ResourceGuard`](crate::server::locks::registry::ResourceGuard), so the
/// lock is released on this path as well.
///
/// A failed fetch is still handed off, so the aggregator can account for it;
/// it is never retried.
pub async fn process_unit(
    unit_id: usize,
    resource: ResourceId,
    locks: Arc<KeyLockRegistry>,
    fetcher: Arc<CacheAsideFetcher>,
    item_tx: mpsc::Sender<WorkItem>,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(unit_id, %resource, "Unit cancelled before fetch completed");
            return;
        }
        outcome = async {
            let guard = locks.acquire(&resource).await;
            let outcome = fetcher.fetch(&guard).await;
            // Released before the hand-off, which may block on a slow reader.
            guard.release();
            outcome
        } => outcome,
    };

    if let Err(e) = &outcome {
        tracing::warn!(unit_id, %resource, error = %e, "Origin fetch failed");
    }

    let item = WorkItem {
        unit_id,
        resource,
        outcome,
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(unit_id, "Unit cancelled during hand-off");
        }
        sent = item_tx.send(item) => {
            if let Err(e) = sent {
                tracing::debug!(unit_id, resource = %e.0.resource, "Aggregator gone, discarding result");
            }
        }
    }
}
