mod auth;
mod config;
mod error;
mod models;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::services::site_registry::SiteRegistry;
use crate::state::AppState;
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting deploy server on port {}", config.port);
    tracing::info!(
        mode = ?config.mode,
        web_root = %config.web_root.display(),
        versioning = config.enable_versioning,
        backend = ?config.version_backend,
        "Server configuration"
    );

    // Ensure the web root exists
    std::fs::create_dir_all(&config.web_root)
        .with_context(|| format!("creating web root {}", config.web_root.display()))?;

    let registry = SiteRegistry::open(&config.registry_path)?;
    tracing::info!(
        "Loaded registry from {} ({} sites)",
        registry.path().display(),
        registry.data().sites.len()
    );
    if registry.data().is_open() {
        tracing::warn!("Registry has no users and no API key; API is open to everyone");
    }

    // Build application state
    let state = Arc::new(AppState::new(config.clone(), registry));

    // Build router
    let app = routes::create_router(state);

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
