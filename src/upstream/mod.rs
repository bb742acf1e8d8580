//! Upstream generation service clients.

mod client;
mod http;
mod mock;
mod traits;

pub use client::build_upstream_client;
pub use http::{HttpUpstream, Line, LineCodec, LineTokenSource, DEFAULT_MAX_LINE_BYTES};
pub use mock::MockUpstream;
pub use traits::{
    GenerationBackend, Prompt, Token, TokenSource, TokenSourceTrait, VecTokenSource,
};

use std::sync::Arc;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Create a backend from configuration.
pub fn create_backend(
    config: &UpstreamConfig,
) -> Result<Arc<dyn GenerationBackend>, UpstreamError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockUpstream::with_delay(config.mock_token_delay()))),
        "http" => {
            let client = build_upstream_client(config)?;
            let upstream = HttpUpstream::new(client, &config.url, config.read_timeout())?
                .with_max_line_bytes(config.max_line_bytes);
            Ok(Arc::new(upstream))
        }
        other => Err(UpstreamError::Config(format!(
            "Unknown upstream provider: {}. Available: http, mock",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend_by_provider() {
        let mut config = UpstreamConfig::default();
        assert_eq!(create_backend(&config).unwrap().name(), "http");

        config.provider = "mock".to_string();
        assert_eq!(create_backend(&config).unwrap().name(), "mock");

        config.provider = "openai".to_string();
        assert!(matches!(
            create_backend(&config),
            Err(UpstreamError::Config(_))
        ));
    }
}
