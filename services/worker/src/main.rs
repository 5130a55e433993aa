use anyhow::{Context, Result};
use shutter_pipeline::{BrokerConfig, JobConsumer, JobProducer};
use shutter_storage::{BlobStore, MetadataStore};
use shutter_worker::{Config, ThumbnailProcessor};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    let broker_config =
        BrokerConfig::from_env().context("Failed to load broker configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        width = config.thumbnail.width,
        height = config.thumbnail.height,
        "Starting Shutter thumbnail worker"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = Arc::new(
        MetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blob_store = Arc::new(
        BlobStore::new(&config.blob)
            .await
            .context("Failed to initialize blob store")?,
    );

    // The producer handles requeues and dead letters for the consumer.
    let producer = Arc::new(
        JobProducer::new(broker_config.clone()).context("Failed to initialize job producer")?,
    );

    let consumer = Arc::new(
        JobConsumer::new(broker_config, producer.clone())
            .context("Failed to initialize job consumer")?,
    );

    let processor = Arc::new(ThumbnailProcessor::new(
        blob_store,
        metadata_store,
        config.thumbnail.clone(),
    ));

    // Spawn consume loop
    let consume_consumer = consumer.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consume_consumer.run(processor).await {
            error!(error = %e, "Job consumer error");
        }
    });

    info!("Thumbnail worker started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down thumbnail worker");

    // Let the in-flight job resolve before exiting.
    consumer.shutdown();
    let _ = consumer_handle.await;

    info!("Thumbnail worker stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
