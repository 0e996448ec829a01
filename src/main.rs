//! Broadcast Tracker service
//!
//! Serves the inspection API and Prometheus metrics over the broadcast
//! store that embedded coordinators write to.

use anyhow::Result;
use broadcast_tracker::api;
use broadcast_tracker::config::Settings;
use broadcast_tracker::metrics::{self, MetricsServer};
use broadcast_tracker::state::{Database, PgDatabase};
use broadcast_tracker::tx::BroadcastStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Broadcast Tracker v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration (confirmation depth {}, stale depth {})",
        settings.tracker.confirmation_depth, settings.tracker.stale_depth
    );

    // Initialize database connection
    let database = Arc::new(PgDatabase::new(&settings.database).await?);
    info!("Database connection established");

    // Run migrations
    database.run_migrations().await?;
    info!("Database migrations complete");

    let store = BroadcastStore::new(database.clone());

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let store = store.clone();
        async move {
            if let Err(e) = api::run_server(config, store).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let database = database.clone();
        let store = store.clone();
        let interval = settings.tracker.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                if let Err(e) = database.health_check().await {
                    warn!("Database health check failed: {}", e);
                    metrics::record_health_check_failure();
                    continue;
                }

                match store.get_all().await {
                    Ok(records) => {
                        let pending = records.iter().filter(|r| r.is_pending()).count();
                        metrics::record_tracked(pending, records.len() - pending);
                    }
                    Err(e) => warn!("Failed to read tracked broadcasts: {}", e),
                }

                metrics::record_health_check();
            }
        }
    });

    info!("Broadcast Tracker is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Broadcast Tracker stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,broadcast_tracker=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
