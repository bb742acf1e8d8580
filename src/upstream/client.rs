//! Shared HTTP client builder for the upstream generation service.

use reqwest::Client;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Build an HTTP client for long-lived line streams.
///
/// Only the connect phase is bounded here. Token streams stay open for as
/// long as generation runs, so an overall request timeout would cut them
/// off; per-line read deadlines are enforced by the token reader instead.
pub fn build_upstream_client(config: &UpstreamConfig) -> Result<Client, UpstreamError> {
    let builder = Client::builder()
        .connect_timeout(config.connect_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true);

    tracing::info!(
        connect_timeout_secs = config.connect_timeout_secs,
        read_timeout_secs = config.read_timeout_secs,
        pool_size = config.pool_max_idle_per_host,
        "Upstream HTTP client configured"
    );

    builder
        .build()
        .map_err(|e| UpstreamError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_client() {
        assert!(build_upstream_client(&UpstreamConfig::default()).is_ok());
    }
}
