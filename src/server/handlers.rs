//! Request handlers.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::state::{AppState, HOME_TEMPLATE};
use crate::error::ApiError;
use crate::metrics::{self, Timer};
use crate::relay::{spawn_relay, PendingRelay};
use crate::streaming::{sse_headers, BodySink, SseWriter};
use crate::upstream::Prompt;

const HOME: &str = "home";
const GENERATE: &str = "generate";
const START: &str = "start";

/// Query string of `GET /generate`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    pub message: Option<String>,
    /// Attach to a stream created by `POST /start` instead of starting one.
    pub stream_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub stream_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub active_streams: u64,
    pub pending_streams: usize,
}

/// Count a rejected request and log it.
fn observe<T>(endpoint: &'static str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    if let Err(e) = &result {
        let status = e.status();
        metrics::record_request_error(endpoint, status.as_u16());
        if status.is_server_error() {
            tracing::warn!(endpoint, status = status.as_u16(), error = %e, "Request failed");
        } else {
            tracing::debug!(endpoint, status = status.as_u16(), error = %e, "Request rejected");
        }
    }
    result
}

/// `GET /generate`: stream tokens for a prompt as Server-Sent Events.
pub async fn generate(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> Result<Response, ApiError> {
    metrics::record_request(GENERATE);
    observe(GENERATE, generate_inner(state, params).await)
}

async fn generate_inner(state: AppState, params: GenerateParams) -> Result<Response, ApiError> {
    let (sink, body) = BodySink::channel();
    let mut writer = SseWriter::new(sink, state.config.server.write_timeout())?;

    let pending = match params.stream_id.as_deref().filter(|id| !id.is_empty()) {
        Some(raw) => claim_stream(&state, raw)?,
        None => {
            let prompt = Prompt::parse(params.message.as_deref().unwrap_or_default())?;
            spawn_relay(state.backend.clone(), prompt)
        }
    };

    let stream_id = pending.id();
    let mut stream = pending
        .established(state.config.relay.ready_timeout())
        .await?;

    let shutdown = state.shutdown.signal();
    let span = tracing::info_span!("stream", %stream_id);

    state.shutdown.spawn_stream(
        async move {
            let timer = Timer::new();
            tracing::debug!("Streaming to client");

            let outcome = writer.pump(&mut stream, shutdown).await;

            metrics::record_stream_duration(outcome.as_str(), timer.elapsed());
            tracing::info!(
                outcome = outcome.as_str(),
                events = writer.events_written(),
                bytes = writer.bytes_written(),
                duration_ms = timer.elapsed().as_millis() as u64,
                "Stream ended for client"
            );
        }
        .instrument(span),
    );

    Ok((sse_headers(), body).into_response())
}

fn claim_stream(state: &AppState, raw: &str) -> Result<PendingRelay, ApiError> {
    let unknown = || ApiError::UnknownStream(raw.to_string());
    let id = Uuid::parse_str(raw).map_err(|_| unknown())?;
    let relay = state.registry.claim(&id).ok_or_else(unknown)?;
    tracing::debug!(stream_id = %id, "Attached to started stream");
    Ok(relay)
}

/// `POST /start`: begin generation now, stream it later via `/generate?stream_id=`.
pub async fn start(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StartResponse>, ApiError> {
    metrics::record_request(START);
    observe(START, start_inner(state, &body))
}

fn start_inner(state: AppState, body: &[u8]) -> Result<Json<StartResponse>, ApiError> {
    let request: StartRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    let prompt = Prompt::parse(request.message.as_deref().unwrap_or_default())?;

    let prompt_len = prompt.len();
    let stream_id = state
        .registry
        .insert(spawn_relay(state.backend.clone(), prompt));

    tracing::info!(%stream_id, prompt_len, "Generation started");
    Ok(Json(StartResponse { stream_id }))
}

/// `GET /`
pub async fn home(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    metrics::record_request(HOME);

    let mut context = tera::Context::new();
    context.insert("upstream", state.backend.name());

    let rendered = state
        .templates
        .render(HOME_TEMPLATE, &context)
        .map(Html)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to render home page");
            ApiError::Render(String::new())
        });
    observe(HOME, rendered)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.backend.name().to_string(),
        active_streams: state.shutdown.active_streams(),
        pending_streams: state.registry.len(),
    })
}
