//! Vigia Server - abuse protection for a checkout funnel
//!
//! This server handles:
//! - Per-origin rate limiting and request classification
//! - Bot and scraper redirects
//! - Offer link verification on protected routes
//! - Transaction throttling with origin bans
//! - Periodic cleanup of expired state

mod abuse;
mod config;
mod routes;

use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vigia_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Vigia server on {}:{}", config.host, config.port);
    tracing::info!(
        "Mode: {}",
        if config.developing { "development" } else { "production" }
    );

    if config.instance_count_hint > 1 {
        tracing::warn!(
            "INSTANCE_COUNT_HINT is {} but counters and bans are process-local; instances will not share them",
            config.instance_count_hint
        );
    }
    if !config.developing && config.offer_secret.is_empty() && !config.protected_routes.is_empty() {
        tracing::warn!("OFFER_SECRET is empty: protected routes will redirect every visitor");
    }

    // Create app state
    let state = routes::AppState::new(config.clone())?;
    for route in state.link_guard.routes() {
        tracing::info!("Protecting {} (fallback {})", route.path, route.fallback_url);
    }

    // Start the cleanup sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = abuse::spawn_sweeper(state.sweeper(), config.sweep_interval(), shutdown_rx);

    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(e) = &result {
        tracing::error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!("Cleanup sweeper failed: {}", e);
    }

    tracing::info!("Vigia server stopped");
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
