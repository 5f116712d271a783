use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

use crate::forwarder::{ForwarderConfig, OverflowPolicy};
use crate::router::RequestLimits;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "metrics-import")]
    pub otel_service_name: String,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(default = "10000")]
    pub body_read_timeout_ms: u64,

    #[envconfig(default = "20971520")]
    pub max_body_bytes: usize, // Limit on the body as sent, before decompression

    #[envconfig(default = "1024")]
    pub forward_queue_capacity: usize,

    #[envconfig(default = "32")]
    pub forward_max_concurrency: u32,

    #[envconfig(default = "drop")]
    pub forward_overflow_policy: OverflowPolicy,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn forwarder(&self) -> ForwarderConfig {
        ForwarderConfig {
            queue_capacity: self.forward_queue_capacity,
            max_concurrency: self.forward_max_concurrency,
            overflow: self.forward_overflow_policy,
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            body_read_timeout: Duration::from_millis(self.body_read_timeout_ms),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
    #[envconfig(default = "metrics_import")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}
