use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use metrics_import::config::Config;
use metrics_import::server::serve;

async fn shutdown() {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down, draining in-flight imports");
}

fn otlp_tracer(config: &Config, endpoint: &str) -> Tracer {
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.otel_sampling_rate,
    )));
    let resource = Resource::new([KeyValue::new(
        "service.name",
        config.otel_service_name.clone(),
    )]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(sampler)
                .with_resource(resource),
        )
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)
        .expect("failed to install OpenTelemetry tracer")
}

/// stdout logs follow RUST_LOG (INFO by default), spans are exported over
/// OTLP at LOG_LEVEL and above when OTEL_URL is set.
fn init_tracing(config: &Config) {
    let stdout = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    let otlp = config
        .otel_url
        .as_deref()
        .map(|endpoint| OpenTelemetryLayer::new(otlp_tracer(config, endpoint)))
        .with_filter(LevelFilter::from_level(config.log_level));

    tracing_subscriber::registry()
        .with(stdout)
        .with(otlp)
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration");
    init_tracing(&config);

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind address");
    serve(config, listener, shutdown()).await;
}
