use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::patterns::{PatternLines, TestPattern};

/// Requests served, reported by `/health`.
static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);

/// Shared application state
pub struct AppState {
    pub token_count: usize,
    pub token_delay: Duration,
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    message: Option<String>,
}

/// GET /generate?message=...
///
/// Streams `text/plain`, one token per line, with a delay before each line.
/// The `X-Test-Pattern` header selects alternative bodies (see [`TestPattern`]).
pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<GenerateQuery>,
) -> Response {
    REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);

    let pattern_header = headers.get("X-Test-Pattern").and_then(|v| v.to_str().ok());
    let pattern = TestPattern::parse(pattern_header);
    let prompt = query.message.unwrap_or_default();

    if let TestPattern::Status(code) = pattern {
        tracing::debug!(status = code, "Refusing generation request");
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        return (status, format!("refused by test pattern ({})\n", code)).into_response();
    }

    let lines = PatternLines::new(&pattern, &prompt, state.token_count);
    tracing::debug!(
        pattern = pattern.name(),
        prompt_len = prompt.len(),
        lines = lines.len(),
        "Generation request"
    );
    let failure = lines.abort_after().map(|n| {
        Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("aborted after {} lines", n),
        ))
    });

    let delay = state.token_delay;
    let body = stream::iter(lines.into_lines().into_iter().map(Ok::<Bytes, io::Error>))
        .chain(stream::iter(failure))
        .then(move |item| async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            item
        });

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        [("X-Test-Pattern-Applied", pattern.name())],
        Body::from_stream(body),
    )
        .into_response()
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "requests": REQUEST_COUNT.load(Ordering::Relaxed),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/generate", get(generate))
            .route("/health", get(health))
            .with_state(Arc::new(AppState {
                token_count: 4,
                token_delay: Duration::ZERO,
            }))
    }

    fn request(uri: &str, pattern: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(p) = pattern {
            builder = builder.header("X-Test-Pattern", p);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_default_stream() {
        let response = app()
            .oneshot(request("/generate?message=hello%20there", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "hello there\nAn\nincreasing\nsequence:\none,\n");
    }

    #[tokio::test]
    async fn test_empty_pattern() {
        let response = app()
            .oneshot(request("/generate?message=hi", Some("empty")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-test-pattern-applied"], "empty");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_status_pattern() {
        let response = app()
            .oneshot(request("/generate?message=hi", Some("status:500")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_abort_pattern_fails_body() {
        let response = app()
            .oneshot(request("/generate?message=hi", Some("abort:2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.into_body().collect().await.is_err());
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
    }
}
