use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::sinks::ImportSink;
use crate::stats::{MetricsFacade, StatsClient};

fn create_sink(
    config: &Config,
    liveness: &HealthRegistry,
) -> anyhow::Result<Arc<dyn ImportSink + Send + Sync>> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink".to_string(), Duration::from_secs(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok(Arc::new(PrintSink {}))
    } else {
        let sink_liveness = liveness.register("rdkafka".to_string(), Duration::from_secs(30));
        Ok(Arc::new(KafkaSink::new(config.kafka.clone(), sink_liveness)?))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");
    let stats: Arc<dyn StatsClient + Send + Sync> = Arc::new(MetricsFacade);

    let sink = create_sink(&config, &liveness).expect("failed to create sink");

    let (forwarder, forwarder_task) = Forwarder::start(
        sink,
        stats.clone(),
        config.forwarder(),
        liveness.register("forwarder".to_string(), Duration::from_secs(30)),
    );

    let app = router::router(
        liveness,
        stats,
        forwarder,
        config.request_limits(),
        config.export_prometheus,
    );

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(err) => tracing::warn!("could not read listener address: {}", err),
    }

    // In-flight requests complete before this returns, which drops the
    // router and closes the forward queue.
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!("server error: {}", err);
    }

    forwarder_task.drain().await;
    tracing::info!("server shutdown completed");
}
