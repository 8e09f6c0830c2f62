use anyhow::{Context, Result};
use depot_upload::api::{create_router, AppState};
use depot_upload::config::Config;
use depot_upload::idempotency::IdempotencyGuard;
use depot_upload::intake::UploadService;
use depot_upload::publisher::KafkaPublisher;
use depot_upload::relay::OutboxRelay;
use depot_upload::store::FileStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Depot Upload Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        FileStore::connect(&config.database)
            .await
            .context("Failed to initialize file store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let guard = Arc::new(IdempotencyGuard::connect(&config.redis).await);

    let publisher = Arc::new(
        KafkaPublisher::new(&config.kafka).context("Failed to initialize Kafka producer")?,
    );

    let uploads = Arc::new(UploadService::new(store.clone()));

    let staging_dir = PathBuf::from(&config.upload.staging_dir);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .context("Failed to create staging directory")?;

    // Spawn the outbox relay task
    let relay = OutboxRelay::new(store.clone(), publisher.clone(), &config.upload);
    let relay_handle = tokio::spawn(async move {
        relay.run().await;
    });

    // Start the HTTP API
    let state = AppState {
        uploads,
        guard,
        store,
        staging_dir,
    };
    let router = create_router(state, &config.http);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {addr}"))?;

    info!(addr = %addr, "Upload service started successfully");

    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down upload service");

    // Abort tasks
    relay_handle.abort();
    api_handle.abort();

    info!("Upload service stopped");

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
