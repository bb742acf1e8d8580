//! Error types for the relay.

use std::io;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for process-level relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can stop the relay from starting.
///
/// Nothing in request handling produces one of these; per-request failures
/// are [`ApiError`], [`UpstreamError`] or [`StreamError`].
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Errors from the upstream generation service.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if let Some(status) = e.status() {
            UpstreamError::Status {
                status: status.as_u16(),
            }
        } else {
            UpstreamError::Connection(e.to_string())
        }
    }
}

/// Errors while writing events to the client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Write error: {0}")]
    Write(#[from] io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Write timeout")]
    Timeout,
}

/// Errors surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("SSE not supported")]
    StreamingUnsupported,

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("Upstream did not respond in time")]
    UpstreamTimeout,

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("{0}")]
    Render(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::StreamingUnsupported | ApiError::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UnknownStream(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Timeout => ApiError::UpstreamTimeout,
            other => ApiError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = format_error_body(status, &self.to_string());
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

/// Plain-text error body. The detail is sanitized to prevent response splitting.
pub fn format_error_body(status: StatusCode, detail: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Error");
    let safe_detail: String = detail.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    if safe_detail.is_empty() {
        format!("{}\n", reason)
    } else {
        format!("{}: {}\n", reason, safe_detail)
    }
}
