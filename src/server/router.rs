//! Route table and server loop.

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/generate", get(handlers::generate))
        .route("/start", post(handlers::start))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown coordinator fires.
///
/// Open SSE responses end on their own once shutdown is signaled, which
/// lets the graceful shutdown complete.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.signaled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
