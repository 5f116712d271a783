use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;
use crate::metric::{MetricBatch, MetricRecord};
use crate::sinks::{ImportSink, SinkError};

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // The stats callback only fires while the rdkafka main loop is running
        self.liveness.report_healthy();

        gauge!("import_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("import_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("import_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("import_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("import_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "import_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            counter!(
                "import_kafka_broker_tx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.txerrs);
        }
    }
}

/// Publishes every record of a batch as one JSON message, keyed by
/// metric type and name so that a series always lands on one partition.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic,
        })
    }

    fn kafka_send(&self, record: &MetricRecord) -> Result<DeliveryFuture, SinkError> {
        let payload = serde_json::to_string(record)?;
        let key = record.key();

        match self
            .producer
            .send_result(FutureRecord::to(&self.topic).payload(&payload).key(&key))
        {
            Ok(ack) => Ok(ack),
            Err((e, _)) => match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageSizeTooLarge) => Err(SinkError::RecordTooBig),
                _ => {
                    error!("failed to produce record: {}", e);
                    Err(SinkError::Retryable)
                }
            },
        }
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<(), SinkError> {
        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!("import_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka before write timeout");
                Err(SinkError::Retryable)
            }
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                Err(SinkError::RecordTooBig)
            }
            Ok(Err((err, _))) => {
                counter!("import_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(SinkError::Retryable)
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl ImportSink for KafkaSink {
    #[instrument(skip_all, fields(records = batch.len()))]
    async fn import(&self, batch: MetricBatch) -> Result<(), SinkError> {
        let batch_size = batch.len();
        let mut set = JoinSet::new();

        for record in batch.records() {
            // Records enter the producer queue in batch order
            let ack = self.kafka_send(record)?;
            set.spawn(Self::process_ack(ack));
        }

        // Wait for the broker acks concurrently, fail the batch on the first error
        async move {
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        set.abort_all();
                        return Err(err);
                    }
                    Err(err) => {
                        set.abort_all();
                        error!("join error while waiting on Kafka ack: {:?}", err);
                        return Err(SinkError::Retryable);
                    }
                }
            }
            Ok(())
        }
        .instrument(info_span!("ack_wait_many"))
        .await?;

        histogram!("import_kafka_batch_size").record(batch_size as f64);
        counter!("import_kafka_records_produced_total").increment(batch_size as u64);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Duration::from_secs(30)))
            .await
            .map_err(|err| {
                error!("flush task failed: {}", err);
                SinkError::Retryable
            })?;

        flushed.map_err(|err| {
            error!("failed to flush Kafka producer: {}", err);
            SinkError::Retryable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use crate::metric::MetricValue;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    fn record(name: &str) -> MetricRecord {
        MetricRecord {
            name: name.to_string(),
            metric_type: Default::default(),
            tags: vec!["env:test".to_string()],
            joined_tags: None,
            value: MetricValue::Number(1.0),
        }
    }

    fn start_on_mocked_sink() -> (MockCluster<'static, DefaultProducerContext>, KafkaSink) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka".to_string(), Duration::from_secs(30));
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 500,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: "metrics_import".to_string(),
            kafka_tls: false,
        };
        let sink = KafkaSink::new(config, handle).expect("failed to create sink");
        (cluster, sink)
    }

    #[tokio::test]
    async fn kafka_sink_error_handling() {
        // Single test to amortize the producer startup cost
        let (cluster, sink) = start_on_mocked_sink();
        let batch = MetricBatch::new(vec![record("a.b"), record("c.d")]);

        // Wait for the producer to be ready, to keep kafka_message_timeout_ms short
        for _ in 0..20 {
            if sink.import(batch.clone()).await.is_ok() {
                break;
            }
        }

        sink.import(batch.clone())
            .await
            .expect("failed to send initial batch");
        sink.import(MetricBatch::default())
            .await
            .expect("failed to send empty batch");

        // Producer should reject a 2MB message, twice the default `message.max.bytes`
        let big = MetricBatch::new(vec![record(&"x".repeat(2_000_000))]);
        match sink.import(big).await {
            Err(SinkError::RecordTooBig) => {}
            Err(err) => panic!("wrong error code {}", err),
            Ok(()) => panic!("should have errored"),
        };

        // Unretriable broker error
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_INVALID_PARTITIONS; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sink.import(batch.clone()).await {
            Err(SinkError::Retryable) => {}
            Err(err) => panic!("wrong error code {}", err),
            Ok(()) => panic!("should have errored"),
        };

        // Transient errors are retried by the producer
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 2];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        sink.import(batch.clone())
            .await
            .expect("failed to send batch after recovery");

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        sink.flush().await.expect("failed to flush");
    }
}
