#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request};
use axum::Router;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio::sync::Semaphore;

use metrics_import::forwarder::{Forwarder, ForwarderConfig, ForwarderTask, OverflowPolicy};
use metrics_import::health::HealthRegistry;
use metrics_import::metric::MetricBatch;
use metrics_import::router::{router, RequestLimits};
use metrics_import::sinks::{ImportSink, SinkError};
use metrics_import::stats::StatsClient;

#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<MetricBatch>>>,
    failing: bool,
    // When set, every import waits for a permit before completing
    gate: Option<Arc<Semaphore>>,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let sink = Self {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (sink, gate)
    }

    pub fn batches(&self) -> Vec<MetricBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImportSink for MemorySink {
    async fn import(&self, batch: MetricBatch) -> Result<(), SinkError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.failing {
            return Err(SinkError::Retryable);
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
}

#[derive(Default)]
pub struct RecordingStats {
    counts: Mutex<Vec<Emitted>>,
    timings: Mutex<Vec<Emitted>>,
}

impl RecordingStats {
    /// Sum of all deltas counted under `name` with the given tag.
    pub fn count_of(&self, name: &str, tag: &str) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == name && (tag.is_empty() || c.tags.iter().any(|t| t == tag)))
            .map(|c| c.value as u64)
            .sum()
    }

    pub fn counts_named(&self, name: &str) -> Vec<Emitted> {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    pub fn timings(&self) -> Vec<Emitted> {
        self.timings.lock().unwrap().clone()
    }
}

impl StatsClient for RecordingStats {
    fn count(&self, name: &str, delta: u64, tags: &[&str], _rate: f64) {
        self.counts.lock().unwrap().push(Emitted {
            name: name.to_string(),
            value: delta as f64,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    fn timing(&self, name: &str, value_ns: f64, tags: &[&str], _rate: f64) {
        self.timings.lock().unwrap().push(Emitted {
            name: name.to_string(),
            value: value_ns,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }
}

pub const DEFAULT_FORWARDER: ForwarderConfig = ForwarderConfig {
    queue_capacity: 16,
    max_concurrency: 4,
    overflow: OverflowPolicy::Drop,
};

pub struct TestApp {
    pub app: Router,
    pub forwarder: ForwarderTask,
    pub stats: Arc<RecordingStats>,
}

pub fn setup(sink: MemorySink, config: ForwarderConfig, limits: RequestLimits) -> TestApp {
    let stats = Arc::new(RecordingStats::default());
    let liveness = HealthRegistry::new("liveness");
    let (forwarder, task) = Forwarder::start(
        Arc::new(sink),
        stats.clone(),
        config,
        liveness.register("forwarder".to_string(), Duration::from_secs(30)),
    );
    let app = router(liveness, stats.clone(), forwarder, limits, false);

    TestApp {
        app,
        forwarder: task,
        stats,
    }
}

impl TestApp {
    /// Drops the router, which closes the forward queue, and waits for
    /// every accepted batch to reach the sink.
    pub async fn drain(self) -> Arc<RecordingStats> {
        drop(self.app);
        tokio::time::timeout(Duration::from_secs(5), self.forwarder.drain())
            .await
            .expect("forwarder did not drain in time");
        self.stats
    }
}

pub fn import_request(encoding: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut req = Request::builder()
        .method(http::Method::POST)
        .uri("/import")
        .header(http::header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "10.0.0.1");
    if let Some(encoding) = encoding {
        req = req.header(http::header::CONTENT_ENCODING, encoding);
    }
    req.body(body.into()).unwrap()
}

pub fn deflate(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}
