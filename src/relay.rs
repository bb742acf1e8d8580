//! Token relay between an upstream token source and one SSE writer.
//!
//! Each generation request gets its own relay task. The task owns the
//! upstream connection and the only sender of a single-slot channel, so
//! tokens reach the consumer in upstream order and the channel is closed
//! exactly once, by the task, when it exits. A slow consumer blocks the
//! relay instead of losing tokens.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::metrics::{self, Timer};
use crate::upstream::{GenerationBackend, Prompt, Token};

/// Capacity of the handoff channel: at most one token in flight.
const HANDOFF_CAPACITY: usize = 1;

/// Lifecycle of one generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Dispatched,
    Streaming,
    Completed,
    Aborted,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Dispatched => "dispatched",
            StreamState::Streaming => "streaming",
            StreamState::Completed => "completed",
            StreamState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a relay task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayExit {
    /// Upstream reached end of stream.
    Finished,
    /// Upstream read failed mid-stream.
    Failed,
    /// Cancelled by the consumer, the registry or shutdown.
    Cancelled,
    /// The consumer dropped its receiver.
    ConsumerGone,
}

/// Receiving end of a relay. Consumed by exactly one writer.
///
/// Dropping it cancels the relay.
pub struct TokenStream {
    id: Uuid,
    rx: mpsc::Receiver<Token>,
    state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl TokenStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next token. `None` once the relay has closed the channel.
    pub async fn recv(&mut self) -> Option<Token> {
        self.rx.recv().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Stop the relay. Upstream reads end at the next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// A dispatched relay whose upstream may not have answered yet.
pub struct PendingRelay {
    ready: oneshot::Receiver<Result<(), UpstreamError>>,
    stream: TokenStream,
}

impl PendingRelay {
    pub fn id(&self) -> Uuid {
        self.stream.id
    }

    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.stream.state_watch()
    }

    /// Wait until the upstream has answered.
    ///
    /// On failure the relay is cancelled and the upstream error returned,
    /// so the caller can fail just this request.
    pub async fn established(self, timeout: Duration) -> Result<TokenStream, UpstreamError> {
        let PendingRelay { ready, stream } = self;

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(Ok(()))) => Ok(stream),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(UpstreamError::Connection(
                "relay stopped before the upstream answered".to_string(),
            )),
            Err(_) => Err(UpstreamError::Timeout),
        }
    }
}

/// Dispatch a relay task for `prompt`.
///
/// Returns immediately; the upstream request is made by the spawned task.
pub fn spawn_relay(backend: Arc<dyn GenerationBackend>, prompt: Prompt) -> PendingRelay {
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let (state_tx, state_rx) = watch::channel(StreamState::Idle);
    let (ready_tx, ready_rx) = oneshot::channel();

    state_tx.send_replace(StreamState::Dispatched);

    let span = tracing::info_span!("relay", stream_id = %id, backend = backend.name());
    tokio::spawn(
        run_relay(backend, prompt, tx, state_tx, ready_tx, cancel.clone()).instrument(span),
    );

    PendingRelay {
        ready: ready_rx,
        stream: TokenStream {
            id,
            rx,
            state: state_rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
        },
    }
}

async fn run_relay(
    backend: Arc<dyn GenerationBackend>,
    prompt: Prompt,
    tx: mpsc::Sender<Token>,
    state: watch::Sender<StreamState>,
    ready: oneshot::Sender<Result<(), UpstreamError>>,
    cancel: CancellationToken,
) {
    let timer = Timer::new();
    metrics::record_relay_start();

    tracing::debug!(prompt_len = prompt.len(), "Opening upstream stream");

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = backend.open(&prompt) => Some(result),
    };

    let mut source = match opened {
        Some(Ok(source)) => {
            metrics::record_upstream_request(backend.name());
            state.send_replace(StreamState::Streaming);
            let _ = ready.send(Ok(()));
            source
        }
        Some(Err(e)) => {
            metrics::record_upstream_error(backend.name(), upstream_error_kind(&e));
            tracing::warn!(error = %e, "Upstream request failed");
            state.send_replace(StreamState::Aborted);
            let _ = ready.send(Err(e));
            metrics::record_relay_end();
            return;
        }
        None => {
            tracing::debug!("Relay cancelled before upstream answered");
            state.send_replace(StreamState::Aborted);
            metrics::record_relay_end();
            return;
        }
    };

    let mut relayed: u64 = 0;
    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayExit::Cancelled,
            next = source.next_token() => next,
        };

        match next {
            Some(Ok(token)) => {
                if relayed == 0 {
                    metrics::record_upstream_ttft(backend.name(), timer.elapsed());
                }
                tracing::trace!(token = %token, "Received token from upstream");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break RelayExit::Cancelled,
                    sent = tx.send(token) => {
                        if sent.is_err() {
                            break RelayExit::ConsumerGone;
                        }
                    }
                }
                relayed += 1;
            }
            Some(Err(e)) => {
                metrics::record_upstream_error(backend.name(), upstream_error_kind(&e));
                tracing::warn!(error = %e, tokens = relayed, "Error reading upstream stream");
                break RelayExit::Failed;
            }
            None => break RelayExit::Finished,
        }
    };

    // Closing the upstream before the channel keeps the connection from
    // outliving the stream.
    drop(source);
    drop(tx);

    let final_state = match exit {
        RelayExit::Finished => StreamState::Completed,
        _ => StreamState::Aborted,
    };
    state.send_replace(final_state);
    metrics::record_relay_end();

    tracing::debug!(
        tokens = relayed,
        exit = ?exit,
        state = %final_state,
        duration_ms = timer.elapsed().as_millis(),
        "Relay finished, token channel closed"
    );
}

fn upstream_error_kind(e: &UpstreamError) -> &'static str {
    match e {
        UpstreamError::Connection(_) => "connection",
        UpstreamError::Status { .. } => "status",
        UpstreamError::Stream(_) => "stream",
        UpstreamError::Timeout => "timeout",
        UpstreamError::Config(_) => "config",
    }
}
