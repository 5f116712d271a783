use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::forwarder::Forwarder;
use crate::health::HealthRegistry;
use crate::import_endpoint;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::stats::StatsClient;

/// Bounds applied while reading a request body.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub body_read_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            body_read_timeout: Duration::from_secs(10),
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct State {
    pub stats: Arc<dyn StatsClient + Send + Sync>,
    pub forwarder: Forwarder,
    pub limits: RequestLimits,
}

async fn index() -> &'static str {
    "metrics-import"
}

pub fn router(
    liveness: HealthRegistry,
    stats: Arc<dyn StatsClient + Send + Sync>,
    forwarder: Forwarder,
    limits: RequestLimits,
    metrics: bool,
) -> Router {
    let state = State {
        stats,
        forwarder,
        limits,
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/import", post(import_endpoint::import))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
