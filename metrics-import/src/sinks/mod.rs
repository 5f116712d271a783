use async_trait::async_trait;
use thiserror::Error;

use crate::metric::MetricBatch;

pub mod kafka;
pub mod print;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize metric record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("metric record exceeds the maximum message size")]
    RecordTooBig,
    #[error("transient error, batch could be retried")]
    Retryable,
}

impl SinkError {
    pub fn cause(&self) -> &'static str {
        match self {
            SinkError::Serialization(_) => "serialization",
            SinkError::RecordTooBig => "record_too_big",
            SinkError::Retryable => "retryable",
        }
    }
}

/// Downstream consumer of accepted batches. Implementations do their own
/// synchronization, as the forwarder calls them concurrently.
#[async_trait]
pub trait ImportSink {
    async fn import(&self, batch: MetricBatch) -> Result<(), SinkError>;

    /// Called once on shutdown, after the last batch was handed over.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
