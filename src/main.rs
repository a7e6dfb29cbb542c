//! Scan queue server entry point
//!
//! Wires the scan queue, its worker, the history pruner, the periodic
//! scheduler and the HTTP API together and runs until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scan_queue::AppState;
use scan_queue::config::{Config, LogFormat};
use scan_queue::jobs::ScanScheduler;
use scan_queue::services::{
    DirectoryScanExecutor, HistoryPruner, HttpServerService, ScanQueue, ScanWorker,
    ServicesManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    init_tracing(config.log_format);
    info!("Starting scan queue server");
    info!(libraries = config.libraries.len(), "Configuration loaded");

    let queue = ScanQueue::new(config.scan_queue_config());
    let scanner = Arc::new(DirectoryScanExecutor::from_config(&config.libraries));
    let library_ids = scanner.library_ids();

    let services = Arc::new(ServicesManager::new());
    services
        .register(Arc::new(ScanWorker::new(queue.clone(), scanner)))
        .await;
    services
        .register(Arc::new(HistoryPruner::new(queue.clone())))
        .await;
    match &config.scan_schedule {
        Some(schedule) => {
            services
                .register(Arc::new(ScanScheduler::new(
                    queue.clone(),
                    library_ids,
                    schedule.clone(),
                )))
                .await;
        }
        None => info!("Scheduled scans disabled"),
    }

    let state = AppState {
        config: config.clone(),
        queue: queue.clone(),
        services: services.clone(),
    };
    services
        .register(Arc::new(HttpServerService::new(state)))
        .await;

    services.start_all().await?;
    info!("All services started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    queue.close();
    services.stop_all().await?;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scan_queue=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}
