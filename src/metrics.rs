//! Prometheus metrics for the relay.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use nix::libc;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Client write error reason labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// Client disconnected (EPIPE, ECONNRESET, BrokenPipe, ConnectionReset)
    ClientDisconnected,
    /// Timeout (deadline exceeded, ETIMEDOUT)
    Timeout,
    /// Operation was canceled
    Canceled,
    /// Network error (other network-related errors)
    Network,
    /// Other/unknown error
    Other,
}

impl ErrorReason {
    /// Convert to static string for metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::ClientDisconnected => "client_disconnected",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Canceled => "canceled",
            ErrorReason::Network => "network",
            ErrorReason::Other => "other",
        }
    }

    /// Classify an I/O error into an ErrorReason.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                ErrorReason::ClientDisconnected
            }
            io::ErrorKind::TimedOut => ErrorReason::Timeout,
            io::ErrorKind::Interrupted => ErrorReason::Canceled,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => ErrorReason::Network,
            _ => match err.raw_os_error() {
                Some(libc::EPIPE) | Some(libc::ECONNRESET) => ErrorReason::ClientDisconnected,
                Some(libc::ETIMEDOUT) => ErrorReason::Timeout,
                Some(libc::ECANCELED) => ErrorReason::Canceled,
                _ => ErrorReason::Other,
            },
        }
    }
}

/// Relay tasks currently running.
static ACTIVE_RELAYS: AtomicI64 = AtomicI64::new(0);

/// Initialize metrics descriptions.
pub fn init_metrics() {
    describe_counter!("relay_requests_total", "HTTP requests by endpoint");
    describe_counter!(
        "relay_request_errors_total",
        "HTTP requests rejected, by endpoint and status"
    );

    describe_counter!("relay_upstream_requests_total", "Upstream streams opened");
    describe_counter!(
        "relay_upstream_errors_total",
        "Upstream failures by kind (connection, status, stream, timeout)"
    );
    describe_histogram!(
        "relay_upstream_ttft_seconds",
        "Time from dispatch to the first upstream token"
    );

    describe_gauge!("relay_active_relays", "Relay tasks currently running");
    describe_gauge!("relay_active_streams", "SSE responses currently streaming");
    describe_gauge!(
        "relay_pending_streams",
        "Streams started by /start and not yet claimed"
    );
    describe_counter!("relay_events_sent_total", "SSE events written to clients");
    describe_counter!("relay_bytes_sent_total", "Bytes written to clients");
    describe_counter!(
        "relay_client_write_errors_total",
        "Client write failures by reason"
    );
    describe_histogram!(
        "relay_stream_duration_seconds",
        "SSE stream duration by outcome"
    );
}

/// Start the Prometheus metrics HTTP server.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // 1ms to ~16s
    let ttft_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];
    // 10ms to ~163s
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_upstream_ttft_seconds".to_string()),
            &ttft_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_stream_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Record an HTTP request.
pub fn record_request(endpoint: &'static str) {
    counter!("relay_requests_total", "endpoint" => endpoint).increment(1);
}

/// Record a rejected HTTP request.
pub fn record_request_error(endpoint: &'static str, status: u16) {
    counter!(
        "relay_request_errors_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an upstream stream opened.
pub fn record_upstream_request(backend: &'static str) {
    counter!("relay_upstream_requests_total", "backend" => backend).increment(1);
}

/// Record an upstream failure.
pub fn record_upstream_error(backend: &'static str, kind: &'static str) {
    counter!("relay_upstream_errors_total", "backend" => backend, "kind" => kind).increment(1);
}

/// Record time to first token from upstream.
pub fn record_upstream_ttft(backend: &'static str, duration: Duration) {
    histogram!("relay_upstream_ttft_seconds", "backend" => backend).record(duration.as_secs_f64());
}

/// Record relay task start.
pub fn record_relay_start() {
    let current = ACTIVE_RELAYS.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!("relay_active_relays").set(current as f64);
}

/// Record relay task end.
pub fn record_relay_end() {
    let current = ACTIVE_RELAYS.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!("relay_active_relays").set(current as f64);
}

/// Update active SSE stream gauge.
pub fn set_active_streams(count: u64) {
    gauge!("relay_active_streams").set(count as f64);
}

/// Update pending stream gauge.
pub fn set_pending_streams(count: usize) {
    gauge!("relay_pending_streams").set(count as f64);
}

/// Record one SSE event sent.
pub fn record_event_sent() {
    counter!("relay_events_sent_total").increment(1);
}

/// Record bytes sent to client.
pub fn record_bytes_sent(bytes: u64) {
    counter!("relay_bytes_sent_total").increment(bytes);
}

/// Record client write error with reason label.
pub fn record_client_write_error(reason: ErrorReason) {
    counter!("relay_client_write_errors_total", "reason" => reason.as_str()).increment(1);
}

/// Record total stream duration.
pub fn record_stream_duration(outcome: &'static str, duration: Duration) {
    histogram!("relay_stream_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
