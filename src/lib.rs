//! SSE relay for a line-oriented text generation service.
//!
//! A browser asks for a prompt to be generated; the relay opens a streaming
//! request to the upstream service and forwards every line it produces as a
//! `streamed-text` Server-Sent Event.

pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod streaming;
pub mod upstream;

pub use config::Config;
pub use error::{RelayError, Result};
