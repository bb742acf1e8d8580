//! Shutdown signal and stream drain tracking.
//!
//! A single [`CancellationToken`] tells the HTTP server, the registry sweeper
//! and every open SSE writer to stop. Writers run as tracked tasks, counted
//! through a watch channel so the binary can wait for them to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::metrics;

/// Stops the relay and waits for its SSE streams to end.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    streams: Arc<watch::Sender<u64>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (streams, _) = watch::channel(0);
        Self {
            token: CancellationToken::new(),
            streams: Arc::new(streams),
        }
    }

    /// Signal every stream, the sweeper and the server to stop.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Token cancelled on shutdown, for one task to select on.
    pub fn signal(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Resolve once shutdown has been triggered.
    pub fn signaled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Number of SSE streams still being written.
    pub fn active_streams(&self) -> u64 {
        *self.streams.borrow()
    }

    /// Run one SSE stream as a tracked task.
    ///
    /// The stream counts as active until the task ends, panics or is aborted.
    pub fn spawn_stream<F>(&self, stream: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tracked = ActiveStream::enter(self.streams.clone());
        tokio::spawn(async move {
            let _tracked = tracked;
            stream.await;
        })
    }

    /// Wait up to `timeout` for every stream to end. Returns whether they did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut rx = self.streams.subscribe();
        let drained = tokio::time::timeout(timeout, rx.wait_for(|active| *active == 0)).await;
        matches!(drained, Ok(Ok(_)))
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one slot of the active stream count.
struct ActiveStream {
    streams: Arc<watch::Sender<u64>>,
}

impl ActiveStream {
    fn enter(streams: Arc<watch::Sender<u64>>) -> Self {
        streams.send_modify(|active| {
            *active += 1;
            metrics::set_active_streams(*active);
        });
        Self { streams }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.streams.send_modify(|active| {
            *active = active.saturating_sub(1);
            metrics::set_active_streams(*active);
        });
    }
}
