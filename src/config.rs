//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay listens on.
    pub listen_addr: String,

    /// Timeout for individual event writes to the client (seconds).
    pub write_timeout_secs: u64,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,

    /// Glob of the page templates served by `GET /`.
    pub template_glob: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            write_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            template_glob: "templates/*.html".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Upstream generation service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream provider: "http" or "mock".
    pub provider: String,

    /// Generation endpoint. The prompt is appended as the `message` query parameter.
    pub url: String,

    /// Connect timeout (seconds).
    pub connect_timeout_secs: u64,

    /// Maximum wait for the next line of the token stream (seconds).
    pub read_timeout_secs: u64,

    /// Longest accepted line of the token stream (bytes).
    pub max_line_bytes: usize,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,

    /// Delay between tokens for the mock provider (milliseconds).
    pub mock_token_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            url: "http://127.0.0.1:8001/generate".to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 60,
            max_line_bytes: 64 * 1024,
            pool_max_idle_per_host: 32,
            mock_token_delay_ms: 50,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn mock_token_delay(&self) -> Duration {
        Duration::from_millis(self.mock_token_delay_ms)
    }
}

/// Token relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long a stream started by `/start` waits to be claimed (seconds).
    pub pending_ttl_secs: u64,

    /// How long a handler waits for the upstream to answer (seconds).
    pub ready_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 60,
            ready_timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(v) = lookup("RELAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = lookup("RELAY_WRITE_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.server.write_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("RELAY_TEMPLATE_GLOB") {
            self.server.template_glob = v;
        }

        // Upstream overrides
        if let Some(v) = lookup("RELAY_UPSTREAM_PROVIDER") {
            self.upstream.provider = v;
        }
        if let Some(v) = lookup("RELAY_UPSTREAM_URL") {
            self.upstream.url = v;
        }
        if let Some(v) = lookup("RELAY_READ_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.upstream.read_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("RELAY_MAX_LINE_BYTES") {
            if let Ok(n) = v.parse() {
                self.upstream.max_line_bytes = n;
            }
        }

        // Relay overrides
        if let Some(v) = lookup("RELAY_PENDING_TTL") {
            if let Ok(n) = v.parse() {
                self.relay.pending_ttl_secs = n;
            }
        }

        // Metrics overrides
        if let Some(v) = lookup("RELAY_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RELAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging overrides
        if let Some(v) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("RELAY_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
