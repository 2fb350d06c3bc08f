//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::monitor::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<Monitor>,
}

/// Web server for uptrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, monitor: Arc<Monitor>) -> Self {
        Self {
            state: AppState { config, monitor },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/tokens", post(handlers::handle_generate_token))
            // Sites
            .route("/api/sites", get(handlers::handle_list_sites).post(handlers::handle_create_site))
            .route("/api/sites/{id}", get(handlers::handle_get_site).delete(handlers::handle_delete_site))
            .route("/api/sites/{id}/status", put(handlers::handle_refresh_site))
            .route("/api/sites/{id}/logs", get(handlers::handle_site_logs))
            .route("/api/sites/{id}/alerts", get(handlers::handle_site_alerts))
            .route("/api/sites/{id}/verify", post(handlers::handle_verify_site))
            .route("/api/sites/{id}/check-tracking", get(handlers::handle_check_tracking))
            .route("/api/sites/{id}/token", put(handlers::handle_update_token))
            // Notifications
            .route("/api/sites/{id}/notifications/email", put(handlers::handle_update_email))
            .route("/api/sites/{id}/notifications/webhook", put(handlers::handle_update_webhook))
            .route("/api/sites/{id}/test-notification", post(handlers::handle_test_notification))
            // Alerts and stats
            .route("/api/alerts/recent", get(handlers::handle_recent_alerts))
            .route("/api/alerts/{id}/acknowledge", post(handlers::handle_acknowledge_alert))
            .route("/api/owners/{owner}/stats", delete(handlers::handle_purge_stats))
            .route("/api/overview", get(handlers::handle_overview))
            // Visitor tracking pixel
            .route("/tracking/{site_id}", get(handlers::handle_tracking))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024)) // 64KB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
