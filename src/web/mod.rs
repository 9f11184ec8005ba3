//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;
use crate::status::StatusAggregator;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub status: Arc<StatusAggregator>,
}

/// Web server for Pingboard.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        status: Arc<StatusAggregator>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                status,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            // Public status
            .route("/api/status", get(handlers::handle_get_status))
            // Monitoring control
            .route("/api/monitor/init", post(handlers::handle_monitor_init))
            // Target administration
            .route(
                "/api/endpoints",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/endpoints/{id}",
                get(handlers::handle_get_target)
                    .patch(handlers::handle_update_target)
                    .delete(handlers::handle_delete_target),
            )
            // Branding
            .route(
                "/api/config",
                get(handlers::handle_get_config).patch(handlers::handle_update_config),
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;

        Ok(())
    }
}
