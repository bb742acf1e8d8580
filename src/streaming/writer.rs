//! SSE writer with per-write timeout.
//!
//! Drains a [`TokenStream`] into an [`EventSink`], one flushed event per token.

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::sse::SseEvent;
use crate::error::{ApiError, StreamError};
use crate::metrics::{self, ErrorReason};
use crate::relay::TokenStream;

/// Destination for rendered events.
#[async_trait]
pub trait EventSink: Send {
    /// Whether written events can be pushed to the client one at a time.
    fn supports_flush(&self) -> bool;

    async fn write(&mut self, data: Bytes) -> Result<(), StreamError>;

    async fn flush(&mut self) -> Result<(), StreamError>;
}

/// Sink feeding a streaming HTTP response body.
///
/// Every write becomes its own body frame, so a write is already a flush.
/// Once the server drops the body, which is how a client disconnect shows
/// up, writes fail with [`StreamError::ClientDisconnected`].
pub struct BodySink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl BodySink {
    /// Create a sink and the response body it feeds.
    pub fn channel() -> (Self, Body) {
        let (tx, rx) = mpsc::channel(1);
        let body = Body::from_stream(ReceiverStream::new(rx));
        (Self { tx }, body)
    }
}

#[async_trait]
impl EventSink for BodySink {
    fn supports_flush(&self) -> bool {
        true
    }

    async fn write(&mut self, data: Bytes) -> Result<(), StreamError> {
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| StreamError::ClientDisconnected)
    }

    async fn flush(&mut self) -> Result<(), StreamError> {
        if self.tx.is_closed() {
            return Err(StreamError::ClientDisconnected);
        }
        Ok(())
    }
}

/// How a writer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterOutcome {
    /// The relay closed the channel.
    Completed,
    /// A write failed; the client is gone.
    ClientGone,
    /// Server shutdown interrupted the stream.
    Shutdown,
}

impl WriterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterOutcome::Completed => "completed",
            WriterOutcome::ClientGone => "client_gone",
            WriterOutcome::Shutdown => "shutdown",
        }
    }
}

/// SSE writer with per-write timeout.
pub struct SseWriter<S> {
    sink: S,
    write_timeout: Duration,
    events_written: u64,
    bytes_written: u64,
}

impl<S: EventSink> SseWriter<S> {
    /// Create a new SSE writer. Fails if the sink cannot flush per event.
    pub fn new(sink: S, write_timeout: Duration) -> Result<Self, ApiError> {
        if !sink.supports_flush() {
            return Err(ApiError::StreamingUnsupported);
        }

        Ok(Self {
            sink,
            write_timeout,
            events_written: 0,
            bytes_written: 0,
        })
    }

    /// Write and flush one event.
    pub async fn send_event(&mut self, event: &SseEvent) -> Result<(), StreamError> {
        let data = event.render();
        let len = data.len() as u64;

        let sink = &mut self.sink;
        tokio::time::timeout(self.write_timeout, async move {
            sink.write(data).await?;
            sink.flush().await
        })
        .await
        .map_err(|_| StreamError::Timeout)??;

        self.events_written += 1;
        self.bytes_written += len;
        metrics::record_bytes_sent(len);
        metrics::record_event_sent();
        Ok(())
    }

    /// Relay tokens until the stream ends, a write fails, or shutdown is signaled.
    ///
    /// Any early exit cancels the relay so the upstream read stops too.
    pub async fn pump(
        &mut self,
        stream: &mut TokenStream,
        shutdown: CancellationToken,
    ) -> WriterOutcome {
        loop {
            let token = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signaled, closing stream");
                    stream.cancel();
                    return WriterOutcome::Shutdown;
                }
                token = stream.recv() => token,
            };

            let Some(token) = token else {
                return WriterOutcome::Completed;
            };

            if let Err(e) = self.send_event(&SseEvent::streamed_text(&token)).await {
                let reason = match &e {
                    StreamError::Write(io) => ErrorReason::from_io_error(io),
                    StreamError::Timeout => ErrorReason::Timeout,
                    StreamError::ClientDisconnected => ErrorReason::ClientDisconnected,
                };
                metrics::record_client_write_error(reason);
                tracing::debug!(error = %e, reason = reason.as_str(), "Error sending SSE to client");
                stream.cancel();
                return WriterOutcome::ClientGone;
            }
        }
    }

    /// Get total events written.
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Get total bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use crate::relay::{spawn_relay, StreamState};
    use crate::upstream::{MockUpstream, Prompt};

    /// Records writes; fails every write from `fail_on` (1-based) onwards.
    #[derive(Default)]
    struct RecordingSink {
        written: Vec<Bytes>,
        attempts: usize,
        flushes: usize,
        fail_on: Option<usize>,
        no_flush: bool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn supports_flush(&self) -> bool {
            !self.no_flush
        }

        async fn write(&mut self, data: Bytes) -> Result<(), StreamError> {
            self.attempts += 1;
            if self.fail_on.is_some_and(|n| self.attempts >= n) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }
            self.written.push(data);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), StreamError> {
            self.flushes += 1;
            Ok(())
        }
    }

    async fn stream_of(tokens: &[&str], delay: Duration) -> TokenStream {
        let backend = Arc::new(MockUpstream::with_tokens(tokens.to_vec(), delay));
        spawn_relay(backend, Prompt::parse("hi").unwrap())
            .established(Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[test]
    fn test_unflushable_sink_is_rejected() {
        let sink = RecordingSink {
            no_flush: true,
            ..Default::default()
        };
        assert!(matches!(
            SseWriter::new(sink, Duration::from_secs(1)),
            Err(ApiError::StreamingUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_pump_writes_one_flushed_event_per_token() {
        let mut stream = stream_of(&["a", "b", "c"], Duration::ZERO).await;
        let mut writer = SseWriter::new(RecordingSink::default(), Duration::from_secs(1)).unwrap();
        let outcome = writer.pump(&mut stream, CancellationToken::new()).await;

        assert_eq!(outcome, WriterOutcome::Completed);
        assert_eq!(writer.events_written(), 3);
        assert_eq!(writer.sink.flushes, 3);
        let body: Vec<u8> = writer.sink.written.concat();
        assert_eq!(
            body,
            b"event: streamed-text\ndata: a\n\nevent: streamed-text\ndata: b\n\nevent: streamed-text\ndata: c\n\n"
        );
        assert_eq!(writer.bytes_written(), body.len() as u64);
    }

    #[tokio::test]
    async fn test_write_error_stops_loop_and_cancels_relay() {
        let mut stream = stream_of(&["1", "2", "3", "4", "5"], Duration::from_millis(5)).await;
        let mut state = stream.state_watch();

        let sink = RecordingSink {
            fail_on: Some(2),
            ..Default::default()
        };
        let mut writer = SseWriter::new(sink, Duration::from_secs(1)).unwrap();
        let outcome = writer.pump(&mut stream, CancellationToken::new()).await;

        assert_eq!(outcome, WriterOutcome::ClientGone);
        // One successful write, one failed attempt, nothing after
        assert_eq!(writer.sink.attempts, 2);
        assert_eq!(writer.sink.written.len(), 1);
        assert_eq!(writer.events_written(), 1);

        let final_state = *state.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(final_state, StreamState::Aborted);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stream() {
        let mut stream = stream_of(&["slow"], Duration::from_secs(5)).await;
        let shutdown = CancellationToken::new();
        let mut writer = SseWriter::new(RecordingSink::default(), Duration::from_secs(1)).unwrap();

        shutdown.cancel();
        let outcome = writer.pump(&mut stream, shutdown).await;

        assert_eq!(outcome, WriterOutcome::Shutdown);
        assert_eq!(writer.events_written(), 0);
    }

    #[tokio::test]
    async fn test_body_sink_reports_dropped_body() {
        let (mut sink, body) = BodySink::channel();
        drop(body);

        let err = sink.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StreamError::ClientDisconnected));
        assert!(matches!(
            sink.flush().await,
            Err(StreamError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_dropped_body_ends_pump_as_client_gone() {
        let mut stream = stream_of(&["a", "b"], Duration::ZERO).await;
        let (sink, body) = BodySink::channel();
        drop(body);

        let mut writer = SseWriter::new(sink, Duration::from_secs(1)).unwrap();
        let outcome = writer.pump(&mut stream, CancellationToken::new()).await;

        assert_eq!(outcome, WriterOutcome::ClientGone);
        assert_eq!(writer.events_written(), 0);
    }
}
