//! Lockstep Coordinator - cross-chain swap brokering daemon
//!
//! Long-lived process wiring the order store, chain gateway, lifecycle
//! controller, HTTP control plane, metrics, and the deadline reaper.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use lockstep_coordinator::api::{self, AppState};
use lockstep_coordinator::bus::BroadcastBus;
use lockstep_coordinator::chain::{ChainGateway, EvmGateway};
use lockstep_coordinator::config::Settings;
use lockstep_coordinator::lifecycle::LifecycleController;
use lockstep_coordinator::metrics::MetricsServer;
use lockstep_coordinator::oracle::ConfigOracle;
use lockstep_coordinator::reaper::Reaper;
use lockstep_coordinator::store::{OrderStore, PgOrderStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!(
        "Starting Lockstep Coordinator v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let settings = Arc::new(Settings::load()?);
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize database connection
    let pg_store = Arc::new(PgOrderStore::new(&settings.database).await?);
    info!("Database connection established");

    // Run migrations
    pg_store.run_migrations().await?;

    let store: Arc<dyn OrderStore> = pg_store;

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Initialize chain gateway (handles all chain connections)
    let gateway = Arc::new(EvmGateway::new(&settings)?);
    info!("Chain connections initialized");

    let bus = Arc::new(BroadcastBus::default());
    let oracle = Arc::new(ConfigOracle::from_config(&settings.oracle)?);

    // Initialize lifecycle controller
    let controller = Arc::new(LifecycleController::new(
        store.clone(),
        gateway.clone(),
        bus.clone(),
        oracle,
        settings.clone(),
    ));

    // Re-arm supervisors for orders that were mid-settlement at last stop
    controller.recover_in_flight().await?;

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            controller: controller.clone(),
            store: store.clone(),
            gateway: gateway.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start the reaper
    let reaper = Arc::new(Reaper::new(
        controller.clone(),
        store.clone(),
        settings.coordinator.clone(),
    ));
    let reaper_handle = tokio::spawn({
        let reaper = reaper.clone();
        async move {
            if let Err(e) = reaper.run().await {
                error!("Reaper error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let gateway = gateway.clone();
        let store = store.clone();
        let interval = settings.coordinator.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                // Check chain connections
                let health = gateway.health_check().await;
                for (chain_id, healthy) in health {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                // Check database connection
                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                }
            }
        }
    });

    info!("Lockstep Coordinator is running");
    info!(
        "API server: http://{}:{}",
        settings.api.host, settings.api.port
    );
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    reaper.stop().await;
    controller.stop().await;

    // Abort background tasks
    api_handle.abort();
    reaper_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Lockstep Coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,lockstep_coordinator=debug,sqlx=warn,hyper=warn")
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
