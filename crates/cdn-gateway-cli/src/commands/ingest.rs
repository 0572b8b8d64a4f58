use anyhow::{anyhow, Result};
use cdn_gateway_core::health::HealthCheck;
use cdn_gateway_core::ingest::{HttpRegistrar, IngestPipeline, SqsQueue};
use cdn_gateway_core::metrics::{create_instrumented_backend, GatewayMetrics, MetricsServer, MetricsServerConfig};
use cdn_gateway_core::system_clock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn run(config_path: &str) -> Result<()> {
    let config = super::load_config(config_path)?;

    let notifications = config
        .notifications
        .as_ref()
        .ok_or_else(|| anyhow!("notifications section is required for ingest"))?;
    let registration = config
        .registration
        .as_ref()
        .ok_or_else(|| anyhow!("registration section is required for ingest"))?;

    let metrics = Arc::new(GatewayMetrics::new());
    let health = Arc::new(HealthCheck::for_ingest());

    let backend = create_instrumented_backend(&config.storage, metrics.clone())?;
    let queue = Arc::new(SqsQueue::new(notifications.to_sqs_config())?);
    let registrar = Arc::new(HttpRegistrar::new(
        registration.endpoint.as_str(),
        registration.admin_token.as_str(),
        Duration::from_secs(registration.timeout_secs),
    )?);

    let pipeline = Arc::new(
        IngestPipeline::new(queue, backend, registrar, system_clock())
            .with_options(config.ingest.clone())
            .with_metrics(metrics.clone())
            .with_health(health.clone()),
    );

    let server_handle = match &config.metrics {
        Some(metrics_config) => {
            let addr: SocketAddr = metrics_config.bind_address.parse()?;
            let server = MetricsServer::new(MetricsServerConfig::with_address(addr), metrics)
                .with_health(health);
            let shutdown_rx = pipeline.shutdown_receiver();
            info!("Metrics server listening on {}", addr);
            Some(tokio::spawn(async move { server.run(shutdown_rx).await }))
        }
        None => None,
    };

    let signal_pipeline = Arc::clone(&pipeline);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Received Ctrl-C, shutting down");
        signal_pipeline.shutdown();
    });

    info!("Starting ingestion from {}", notifications.queue_url);
    let result = pipeline.run().await;

    // Stops the metrics server as well when the loop exits on its own
    pipeline.shutdown();
    if let Some(handle) = server_handle {
        match handle.await {
            Ok(Err(e)) => warn!("Metrics server error: {}", e),
            Err(e) => warn!("Metrics server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    result?;
    info!("Ingestion stopped");
    Ok(())
}
