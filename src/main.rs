//! uptrail - site health monitoring and alerting
//!
//! Probes registered sites on a fixed interval, tracks availability and latency,
//! and alerts site owners by email and chat webhooks.

mod authorize;
mod config;
mod db;
mod error;
mod monitor;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use monitor::Monitor;
use notify::{AlertDispatcher, Mailer, WebhookSender};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Notification channels
    let mailer = match &cfg.smtp {
        Some(smtp) => {
            tracing::info!("Email notifications via {}:{}", smtp.host, smtp.port);
            Some(Mailer::new(smtp, cfg.monitor.delivery_timeout)?)
        }
        None => {
            tracing::warn!("SMTP not configured, email notifications are disabled");
            None
        }
    };
    let webhook = WebhookSender::new(cfg.monitor.delivery_timeout)?;
    let dispatcher = Arc::new(AlertDispatcher::new(store.clone(), webhook, mailer));

    let monitor = Arc::new(Monitor::new(store.clone(), &cfg.monitor, dispatcher)?);
    if cfg.monitor.allowed_domains.is_none() {
        tracing::info!("No domain allowlist configured, any http(s) site may register");
    }

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(store, monitor.clone(), &cfg.monitor));
    scheduler.start().await;

    // Start web server
    let server = Server::new(cfg, monitor);
    let result = server.start().await;

    scheduler.stop().await;
    result
}
