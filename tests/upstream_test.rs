//! HTTP upstream client against a real loopback server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Query;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http_body_util::BodyExt;
use serde::Deserialize;
use tera::Tera;
use tokio::net::TcpListener;
use tower::ServiceExt;

use sse_relay::config::{Config, UpstreamConfig};
use sse_relay::error::UpstreamError;
use sse_relay::server::{build_router, AppState};
use sse_relay::shutdown::ShutdownCoordinator;
use sse_relay::upstream::{
    build_upstream_client, GenerationBackend, HttpUpstream, Prompt, TokenSource, TokenSourceTrait,
};

#[derive(Deserialize)]
struct GenerateQuery {
    message: String,
}

/// Echo the prompt, then two padded tokens.
async fn generate(Query(query): Query<GenerateQuery>) -> String {
    format!("{}\n  hello \r\n\tworld\n", query.message)
}

/// One line, a pause, then a broken body.
async fn abort() -> impl IntoResponse {
    let body = stream::iter([
        Ok(Bytes::from_static(b"one\n")),
        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "boom")),
    ])
    .enumerate()
    .then(|(i, item)| async move {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        item
    });
    Body::from_stream(body)
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/generate", get(generate))
        .route("/unterminated", get(|| async { "first\nlast" }))
        .route("/unavailable", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/abort", get(abort))
        .route("/latin1", get(|| async { Bytes::from_static(b"caf\xe9\nok\n") }))
        .route("/health", get(|| async { "ok" }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn upstream(addr: SocketAddr, path: &str) -> HttpUpstream {
    let client = build_upstream_client(&UpstreamConfig::default()).unwrap();
    HttpUpstream::new(
        client,
        &format!("http://{}{}", addr, path),
        Duration::from_secs(5),
    )
    .unwrap()
}

async fn drain(mut source: TokenSource) -> (Vec<String>, Option<UpstreamError>) {
    let mut tokens = Vec::new();
    while let Some(next) = source.next_token().await {
        match next {
            Ok(token) => tokens.push(token.into_string()),
            Err(e) => return (tokens, Some(e)),
        }
    }
    (tokens, None)
}

#[tokio::test]
async fn test_tokens_are_trimmed_lines() {
    let addr = spawn_upstream().await;
    let source = upstream(addr, "/generate")
        .open(&Prompt::parse("hi").unwrap())
        .await
        .unwrap();

    let (tokens, error) = drain(source).await;
    assert_eq!(tokens, ["hi", "hello", "world"]);
    assert!(error.is_none());
}

#[tokio::test]
async fn test_prompt_is_percent_encoded() {
    let addr = spawn_upstream().await;
    let prompt = Prompt::parse("a b&c=d?é").unwrap();
    let source = upstream(addr, "/generate").open(&prompt).await.unwrap();

    let (tokens, _) = drain(source).await;
    assert_eq!(tokens[0], "a b&c=d?é");
}

#[tokio::test]
async fn test_unterminated_last_line_is_kept() {
    let addr = spawn_upstream().await;
    let source = upstream(addr, "/unterminated")
        .open(&Prompt::parse("hi").unwrap())
        .await
        .unwrap();

    let (tokens, error) = drain(source).await;
    assert_eq!(tokens, ["first", "last"]);
    assert!(error.is_none());
}

#[tokio::test]
async fn test_non_success_status() {
    let addr = spawn_upstream().await;
    let result = upstream(addr, "/unavailable")
        .open(&Prompt::parse("hi").unwrap())
        .await;

    assert!(matches!(result, Err(UpstreamError::Status { status: 503 })));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = upstream(addr, "/generate")
        .open(&Prompt::parse("hi").unwrap())
        .await;
    assert!(matches!(result, Err(UpstreamError::Connection(_))));
}

#[tokio::test]
async fn test_broken_body_keeps_partial_tokens() {
    let addr = spawn_upstream().await;
    let source = upstream(addr, "/abort")
        .open(&Prompt::parse("hi").unwrap())
        .await
        .unwrap();

    let (tokens, error) = drain(source).await;
    assert_eq!(tokens, ["one"]);
    assert!(matches!(error, Some(UpstreamError::Stream(_))));
}

#[tokio::test]
async fn test_invalid_utf8_does_not_end_stream() {
    let addr = spawn_upstream().await;
    let source = upstream(addr, "/latin1")
        .open(&Prompt::parse("hi").unwrap())
        .await
        .unwrap();

    let (tokens, error) = drain(source).await;
    assert_eq!(tokens, ["caf\u{FFFD}", "ok"]);
    assert!(error.is_none());
}

#[tokio::test]
async fn test_health_check() {
    let addr = spawn_upstream().await;
    assert!(upstream(addr, "/generate").health_check().await.is_ok());
}

#[tokio::test]
async fn test_relay_over_http() {
    let addr = spawn_upstream().await;
    let backend: Arc<dyn GenerationBackend> = Arc::new(upstream(addr, "/generate"));
    let state = AppState::new(
        Config::default(),
        backend,
        Tera::default(),
        ShutdownCoordinator::new(),
    );

    let request = Request::builder()
        .uri("/generate?message=hey%20you")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        body,
        "event: streamed-text\ndata: hey you\n\n\
         event: streamed-text\ndata: hello\n\n\
         event: streamed-text\ndata: world\n\n"
    );
}

#[tokio::test]
async fn test_relay_over_http_upstream_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let state = AppState::new(
        Config::default(),
        Arc::new(upstream(addr, "/generate")),
        Tera::default(),
        ShutdownCoordinator::new(),
    );
    let request = Request::builder()
        .uri("/generate?message=hi")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
