//! Mock generation service for exercising sse-relay.
//!
//! Speaks the upstream line protocol: `GET /generate?message=<prompt>`
//! answers with a `text/plain` body holding one token per line and ends
//! the stream when generation is done.

mod config;
mod handlers;
mod patterns;
mod responses;
mod test_data;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use handlers::AppState;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    let filter = if config.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let state = Arc::new(AppState {
        token_count: config.token_count,
        token_delay: Duration::from_millis(config.token_delay_ms),
    });

    let app = Router::new()
        .route("/generate", get(handlers::generate))
        .route("/health", get(handlers::health))
        .with_state(state);

    let listener = TcpListener::bind(&config.listen).await?;

    info!(
        "Mock upstream listening on {} ({} tokens, {}ms between lines)",
        listener.local_addr()?,
        config.token_count,
        config.token_delay_ms
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}
