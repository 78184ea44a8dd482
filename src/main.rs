//! event-gateway server entry point.
//!
//! Starts the Axum HTTP server with the event service endpoints and the
//! user activity scheduler.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use event_gateway::api;
use event_gateway::app_state::AppState;
use event_gateway::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env().context("loading configuration")?;
    tracing::info!(
        addr = %config.listen_addr,
        event_service = %config.event_service,
        strategy = %config.event_service.connection_strategy,
        "starting event-gateway"
    );

    // Build application state and start evicting idle users
    let auto_clean = config.event_service.auto_clean;
    let app_state = AppState::new(config.event_service);
    app_state
        .registry
        .activate_user_activity_scheduler(auto_clean)
        .context("starting user activity scheduler")?;

    // Build router
    let app = api::build_app(app_state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.registry.user_manager().deactivate_user_activity_scheduler();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
