use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::instrument;

use crate::metric::MetricBatch;
use crate::sinks::{ImportSink, SinkError};

pub struct PrintSink {}

#[async_trait]
impl ImportSink for PrintSink {
    #[instrument(skip_all, fields(records = batch.len()))]
    async fn import(&self, batch: MetricBatch) -> Result<(), SinkError> {
        histogram!("import_sink_batch_size").record(batch.len() as f64);
        counter!("import_sink_records_total").increment(batch.len() as u64);

        for record in batch {
            match record.value.decode_encoded() {
                Some(Ok(bytes)) => tracing::info!(
                    name = %record.name,
                    kind = record.metric_type.as_str(),
                    tags = ?record.tags(),
                    "record with {} bytes of encoded value",
                    bytes.len()
                ),
                Some(Err(err)) => tracing::warn!(
                    name = %record.name,
                    "record with an undecodable value: {}",
                    err
                ),
                None => tracing::info!(
                    name = %record.name,
                    kind = record.metric_type.as_str(),
                    tags = ?record.tags(),
                    "record: {:?}",
                    record.value.as_f64()
                ),
            }
        }

        Ok(())
    }
}
