use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};
use tracing::info;

use super::{
    services::{
        cancel_task, convert, download, extract, health, progress, proxy_download,
        proxy_download_indexed,
    },
    state::AppState,
};
use crate::config::Config;
use crate::discovery::{self, BrowserDriver};
use crate::observability::Metrics;
use crate::tasks::TaskRunner;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Router with every mediahound endpoint
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/extract", post(extract))
        .route("/api/progress/{task_id}", get(progress))
        .route("/api/proxy-download/{task_id}", get(proxy_download))
        .route("/api/proxy-download/{task_id}/{index}", get(proxy_download_indexed))
        .route("/api/download", post(download))
        .route("/api/convert", post(convert))
        .route("/api/tasks/{task_id}", delete(cancel_task))
        .route("/health", get(health))
        .with_state(state)
        // Automatically decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Probes the browser driver, picks the discoverer and wires the runner.
pub async fn build_state(config: Config, driver: Option<Arc<dyn BrowserDriver>>) -> Result<AppState, AnyError> {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());

    let discoverer = discovery::select_discoverer(&config, driver)
        .await
        .map_err(|e| format!("Failed to initialize discovery: {e}"))?;
    let runner = TaskRunner::new(Arc::clone(&config), discoverer, Arc::clone(&metrics))
        .map_err(|e| format!("Failed to initialize task runner: {e}"))?;

    Ok(AppState::new(config, runner, metrics))
}

pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let driver = discovery::default_driver(&config);

    info!(path = %config.server.download_dir.display(), "Preparing download directory");
    tokio::fs::create_dir_all(&config.server.download_dir)
        .await
        .map_err(|e| format!("Failed to create download directory: {e}"))?;

    let state = build_state(config, driver).await?;
    let reaper = state.runner.spawn_reaper();
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediahound API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
