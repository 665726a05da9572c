// Branch Directory - Web Server
// REST API + spreadsheet import/export with Axum

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use branch_directory::api::{router, AppState};
use branch_directory::{init_tracing, ServerConfig, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    info!(?config, "starting branch-server {}", branch_directory::VERSION);

    // Open database (created on first run)
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    info!("Database opened: {:?}", config.database_path);

    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("Failed to create upload dir {:?}", config.upload_dir))?;

    // Create shared state
    let state = AppState {
        store: Arc::new(store),
        upload_dir: config.upload_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };

    let app = router(state);

    // Start server
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://{}", addr);
    info!("   API: http://{}/api/branches", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for Ctrl+C; running until killed");
            std::future::pending::<()>().await
        }
    }
}
