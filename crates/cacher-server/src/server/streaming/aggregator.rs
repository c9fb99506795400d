use super::request::WorkItem;
use crate::server::telemetry::increment_items_delivered;
use cacher_core::{Error, Result, proto::CacheData};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Tally of one fan-out round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
    /// Units spawned (the fan-out width).
    pub requested: usize,
    /// Items delivered to the caller.
    pub delivered: usize,
    /// Units whose fetch failed and were left out of the stream.
    pub failed: usize,
}

/// Fan-in side of a round: forwards unit results to the caller in arrival
/// order.
///
/// The aggregator owns the only sender of the caller's response channel. The
/// caller sees end-of-stream when that sender is dropped, which happens in
/// [`finish`](Self::finish). `finish` consumes the aggregator, so the signal
/// fires exactly once.
pub struct StreamingAggregator {
    item_rx: mpsc::Receiver<WorkItem>,
    resp_tx: mpsc::Sender<Result<CacheData, Status>>,
    cancel: CancellationToken,
    report: RoundReport,
}

impl StreamingAggregator {
    pub fn new(
        item_rx: mpsc::Receiver<WorkItem>,
        resp_tx: mpsc::Sender<Result<CacheData, Status>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            item_rx,
            resp_tx,
            cancel,
            report: RoundReport::default(),
        }
    }

    /// Forwards results until every unit has dropped its hand-off sender.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestCancelled`] if the caller went away.
    /// - [`Error::ChannelError`] if delivering a result failed.
    /// - [`Error::ServiceShutdown`] if the round token was cancelled from
    ///   outside, which only happens when the service shuts down. The caller
    ///   is told on a best-effort basis.
    ///
    /// On any error, no further results are forwarded. Stopping the units is
    /// up to the caller of this method.
    pub async fn forward(&mut self) -> Result<()> {
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.notify_shutdown()),
                () = self.resp_tx.closed() => return Err(Error::RequestCancelled),
                item = self.item_rx.recv() => match item {
                    Some(item) => item,
                    None => return Ok(()),
                },
            };
            self.deliver(item).await?;
        }
    }

    async fn deliver(&mut self, item: WorkItem) -> Result<()> {
        let WorkItem {
            unit_id,
            resource,
            outcome,
        } = item;

        let content = match outcome {
            Ok(content) => content,
            Err(e) => {
                self.report.failed += 1;
                tracing::debug!(unit_id, %resource, error = %e, "Leaving failed unit out of the stream");
                return Ok(());
            }
        };

        let data = CacheData {
            content,
            resource_id: resource.to_string(),
        };

        // A full response buffer must not hide cancellation.
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(self.notify_shutdown()),
            sent = self.resp_tx.send(Ok(data)) => {
                sent.map_err(|e| Error::ChannelError {
                    context: format!("Failed to forward result of unit {unit_id}: {e}"),
                })?;
            }
        }

        self.report.delivered += 1;
        increment_items_delivered(1);
        Ok(())
    }

    fn notify_shutdown(&self) -> Error {
        let err = Error::ServiceShutdown;
        if let Err(e) = self.resp_tx.try_send(Err(err.clone().into())) {
            tracing::debug!("Could not tell caller about shutdown: {e}");
        }
        err
    }

    /// Stops accepting hand-offs. Units blocked sending to the aggregator get
    /// an error instead of waiting for a reader that is gone.
    pub fn close_handoff(&mut self) {
        self.item_rx.close();
    }

    /// Ends the caller's stream and returns what was tallied.
    ///
    /// Call only once every unit of the round has terminated.
    pub fn finish(self) -> RoundReport {
        let Self {
            item_rx,
            resp_tx,
            report,
            ..
        } = self;
        drop(item_rx);
        drop(resp_tx);
        report
    }
}
