//! Router and server lifecycle.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use bilistream_core::DownloadService;
use bilistream_core::config::ServerConfig;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers::{download_video, health};

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolves and merges downloads
    pub service: Arc<DownloadService>,
}

impl AppState {
    /// Wraps a service for sharing across requests.
    pub fn new(service: DownloadService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bilibili/download/health", get(health))
        .route("/bilibili/download/{id}", get(download_video))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until `shutdown` is cancelled.
///
/// In-flight responses are allowed to finish after shutdown is requested.
///
/// # Errors
/// - `std::io::Error` - Address could not be bound or the server failed
pub async fn run_server(
    config: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %listener.local_addr()?, "Bilistream server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Shutting down server");
        })
        .await
}
