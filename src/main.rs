//! Pingboard - uptime monitoring with a public status page.

mod config;
mod db;
mod probe;
mod scheduler;
mod status;
mod web;

use config::ServerConfig;
use db::Store;
use probe::{NetworkProber, Prober};
use scheduler::Scheduler;
use status::StatusAggregator;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("pingboard=info".parse()?))
        .init();

    let cfg = ServerConfig::load();
    tracing::info!("Starting Pingboard on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober: Arc<dyn Prober> = Arc::new(NetworkProber::new()?);
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober));
    let status = Arc::new(StatusAggregator::new(store.clone(), cfg.status_cache_ttl));

    // A failed initial sync leaves monitoring idle until POST /api/monitor/init.
    match scheduler.sync_all().await {
        Ok(count) => tracing::info!("Monitoring {} active targets", count),
        Err(e) => tracing::error!("Failed to start monitoring: {}", e),
    }

    let server = Server::new(cfg, store, scheduler.clone(), status);
    let result = server.start(shutdown_signal()).await;

    scheduler.stop_all().await;
    tracing::info!("Shutdown complete");

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
