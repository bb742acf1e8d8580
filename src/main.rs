//! SSE relay server.
//!
//! Forwards prompts to a line-oriented generation service and streams the
//! tokens back to browsers as Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! sse-relay config/relay.toml
//!
//! # With environment variables
//! RELAY_UPSTREAM_URL=http://127.0.0.1:8001/generate sse-relay
//!
//! # Built-in mock upstream for testing
//! RELAY_UPSTREAM_PROVIDER=mock sse-relay
//! ```

use std::path::PathBuf;

use clap::Parser;
use nix::libc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sse_relay::{
    config::{Config, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    server::{load_templates, serve, AppState},
    shutdown::ShutdownCoordinator,
    upstream::create_backend,
};

/// SSE relay for a line-oriented generation service.
#[derive(Parser, Debug)]
#[command(name = "sse-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override upstream generation URL.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Override upstream provider (http, mock).
    #[arg(short, long)]
    provider: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    increase_fd_limit();

    let mut config = Config::load(args.config.as_ref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }
    if let Some(provider) = args.provider {
        config.upstream.provider = provider;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        provider = %config.upstream.provider,
        upstream = %config.upstream.url,
        "Starting SSE relay"
    );

    init_metrics();

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr).await?;
    }

    let backend = create_backend(&config.upstream)?;
    match backend.health_check().await {
        Ok(()) => tracing::info!(backend = backend.name(), "Upstream initialized"),
        // Not fatal: the upstream may come up later, requests answer 502 until then
        Err(e) => tracing::warn!(backend = backend.name(), error = %e, "Upstream health check failed"),
    }

    let templates = load_templates(&config.server.template_glob)?;
    let shutdown = ShutdownCoordinator::new();
    let shutdown_timeout = config.server.shutdown_timeout();

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Relay listening");

    let state = AppState::new(config, backend, templates, shutdown.clone());
    let sweeper = state.registry.spawn_sweeper(shutdown.signal());

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signal_shutdown.clone()).await {
            tracing::error!(error = %e, "Failed to install signal handlers");
            signal_shutdown.trigger();
        }
    });

    let mut server = tokio::spawn(serve(listener, state));

    tokio::select! {
        result = &mut server => {
            // The server only stops by itself on error
            shutdown.trigger();
            result??;
        }
        _ = shutdown.signaled() => {}
    }

    tracing::info!(
        active = shutdown.active_streams(),
        timeout_secs = shutdown_timeout.as_secs(),
        "Waiting for streams to drain"
    );

    if shutdown.drain(shutdown_timeout).await {
        tracing::info!("All streams drained");
    } else {
        tracing::warn!(
            active = shutdown.active_streams(),
            "Shutdown timeout reached, forcing exit"
        );
    }

    if !server.is_finished() {
        server.abort();
    }
    let _ = sweeper.await;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Raise the open file limit so many concurrent streams fit.
fn increase_fd_limit() {
    use std::mem::MaybeUninit;

    const DESIRED_LIMIT: u64 = 65_536;

    unsafe {
        let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
        if libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) == 0 {
            let mut rlim = rlim.assume_init();
            if (rlim.rlim_cur as u64) < DESIRED_LIMIT {
                // Raising the hard limit needs privileges; stay within it
                let target = DESIRED_LIMIT.min(rlim.rlim_max as u64);
                rlim.rlim_cur = target as libc::rlim_t;
                if libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) == 0 {
                    eprintln!("Increased fd limit to {}", target);
                } else {
                    eprintln!("Warning: could not increase fd limit");
                }
            }
        }
    }
}

/// Handle Unix signals.
async fn handle_signals(shutdown: ShutdownCoordinator) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.trigger();
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.trigger();
                return Ok(());
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_streams = shutdown.active_streams(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }
}
