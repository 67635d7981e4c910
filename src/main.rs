//! Todo Gatekeeper server entry point
//!
//! 1. Load configuration from the environment
//! 2. Connect stores (PostgreSQL or in-memory)
//! 3. Spawn the background cleanup task
//! 4. Serve the API until Ctrl-C

use std::net::SocketAddr;
use todo_gatekeeper::app::AppState;
use todo_gatekeeper::core::config::AppConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!(
        bind_addr = %config.bind_addr,
        database = config.database.is_some(),
        trusted_proxy_count = config.trusted_proxy_count,
        "Config loaded"
    );

    let state = AppState::connect(&config)
        .await
        .expect("Failed to initialize stores");

    let cleanup = state.cleanup_task(&config).start();

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    // Connect info is required for per-client rate limiting
    axum::serve(
        listener,
        state
            .router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    cleanup.abort();
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
