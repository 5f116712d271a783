use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::ImportError;
use crate::health::HealthHandle;
use crate::metric::MetricBatch;
use crate::sinks::ImportSink;
use crate::stats::StatsClient;

pub const FORWARD_DROPPED_TOTAL: &str = "import.forward_dropped_total";
pub const FORWARD_ERROR_TOTAL: &str = "import.forward_error_total";
pub const FORWARDED_BATCHES_TOTAL: &str = "import.forwarded_batches_total";
pub const FORWARDED_RECORDS_TOTAL: &str = "import.forwarded_records_total";

const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with an accepted batch when the forward queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Acknowledge the request anyway, discard and count the batch.
    Drop,
    /// Refuse the request with a 503 so the client retries later.
    Reject,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "drop" => Ok(OverflowPolicy::Drop),
            "reject" => Ok(OverflowPolicy::Reject),
            _ => Err(format!("Unknown overflow policy: {s}, must be drop or reject")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForwarderConfig {
    pub queue_capacity: usize,
    pub max_concurrency: u32,
    pub overflow: OverflowPolicy,
}

/// Hands accepted batches to the import sink without blocking requests.
///
/// Batches go through a bounded queue. A single dispatcher task pulls them
/// and spawns one sink call per batch, with at most `max_concurrency`
/// calls in flight. Sink outcomes are logged and counted, never reported
/// back to the client.
#[derive(Clone)]
pub struct Forwarder {
    sender: mpsc::Sender<MetricBatch>,
    overflow: OverflowPolicy,
    stats: Arc<dyn StatsClient + Send + Sync>,
}

/// Outcome of handing a batch to a [`ForwardSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    Dropped,
}

/// Space reserved in the forward queue, or a pending drop when the queue
/// is full under [`OverflowPolicy::Drop`].
pub struct ForwardSlot<'a> {
    forwarder: &'a Forwarder,
    permit: Option<mpsc::Permit<'a, MetricBatch>>,
}

impl ForwardSlot<'_> {
    pub fn send(self, batch: MetricBatch) -> Dispatch {
        match self.permit {
            Some(permit) => {
                permit.send(batch);
                Dispatch::Queued
            }
            None => {
                warn!(
                    records = batch.len(),
                    "forward queue is full, dropping metrics batch"
                );
                self.forwarder
                    .stats
                    .count(FORWARD_DROPPED_TOTAL, 1, &["cause:queue_full"], 1.0);
                Dispatch::Dropped
            }
        }
    }
}

impl Forwarder {
    pub fn start(
        sink: Arc<dyn ImportSink + Send + Sync>,
        stats: Arc<dyn StatsClient + Send + Sync>,
        config: ForwarderConfig,
        liveness: HealthHandle,
    ) -> (Forwarder, ForwarderTask) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let max_concurrency = config.max_concurrency.max(1);

        let handle = tokio::spawn(dispatch_loop(
            receiver,
            sink,
            stats.clone(),
            max_concurrency,
            liveness,
        ));

        let forwarder = Forwarder {
            sender,
            overflow: config.overflow,
            stats,
        };
        (forwarder, ForwarderTask { handle })
    }

    /// Reserves room for one batch without waiting.
    pub fn try_reserve(&self) -> Result<ForwardSlot<'_>, ImportError> {
        match self.sender.try_reserve() {
            Ok(permit) => Ok(ForwardSlot {
                forwarder: self,
                permit: Some(permit),
            }),
            Err(TrySendError::Full(())) => match self.overflow {
                OverflowPolicy::Drop => Ok(ForwardSlot {
                    forwarder: self,
                    permit: None,
                }),
                OverflowPolicy::Reject => Err(ImportError::QueueFull),
            },
            Err(TrySendError::Closed(())) => Err(ImportError::ShuttingDown),
        }
    }
}

pub struct ForwarderTask {
    handle: JoinHandle<()>,
}

impl ForwarderTask {
    /// Completes once every `Forwarder` clone is dropped, all queued
    /// batches were forwarded and the sink was flushed.
    pub async fn drain(self) {
        if let Err(err) = self.handle.await {
            error!("forwarder task failed: {}", err);
        }
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<MetricBatch>,
    sink: Arc<dyn ImportSink + Send + Sync>,
    stats: Arc<dyn StatsClient + Send + Sync>,
    max_concurrency: u32,
    liveness: HealthHandle,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrency as usize));
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    liveness.report_healthy();

    loop {
        let batch = tokio::select! {
            batch = receiver.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
            _ = ticker.tick() => {
                liveness.report_healthy();
                continue;
            }
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                error!("forwarder semaphore closed: {}", err);
                break;
            }
        };
        liveness.report_healthy();

        let sink = sink.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            forward(sink.as_ref(), stats.as_ref(), batch).await;
            drop(permit);
        });
    }

    debug!("forward queue closed, waiting for in-flight batches");
    if semaphore.acquire_many(max_concurrency).await.is_err() {
        warn!("forwarder semaphore closed before in-flight batches completed");
    }

    if let Err(err) = sink.flush().await {
        error!("failed to flush import sink: {}", err);
    }
    info!("forwarder drained");
}

async fn forward(
    sink: &(dyn ImportSink + Send + Sync),
    stats: &(dyn StatsClient + Send + Sync),
    batch: MetricBatch,
) {
    let records = batch.len();
    match sink.import(batch).await {
        Ok(()) => {
            stats.count(FORWARDED_BATCHES_TOTAL, 1, &[], 1.0);
            stats.count(FORWARDED_RECORDS_TOTAL, records as u64, &[], 1.0);
        }
        Err(err) => {
            error!(records, "failed to import metrics batch: {}", err);
            let cause = format!("cause:{}", err.cause());
            stats.count(FORWARD_ERROR_TOTAL, 1, &[cause.as_str()], 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overflow_policy() {
        assert_eq!("drop".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Drop));
        assert_eq!(" Reject ".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Reject));
        assert!("block".parse::<OverflowPolicy>().is_err());
    }
}
