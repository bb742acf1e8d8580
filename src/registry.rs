//! Streams started by `POST /start`, waiting to be claimed by `GET /generate`.
//!
//! A pending stream holds a live relay. It is handed out at most once and
//! cancelled if nobody claims it within the configured TTL.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics;
use crate::relay::PendingRelay;

struct Entry {
    relay: PendingRelay,
    created: Instant,
}

/// Registry of unclaimed streams, keyed by stream id.
#[derive(Clone)]
pub struct StreamRegistry {
    entries: Arc<DashMap<Uuid, Entry>>,
    ttl: Duration,
}

impl StreamRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Register a relay and return the id a client uses to claim it.
    pub fn insert(&self, relay: PendingRelay) -> Uuid {
        let id = relay.id();
        self.entries.insert(
            id,
            Entry {
                relay,
                created: Instant::now(),
            },
        );
        metrics::set_pending_streams(self.entries.len());
        tracing::debug!(stream_id = %id, pending = self.entries.len(), "Stream registered");
        id
    }

    /// Take the relay for `id`. Returns `None` if unknown, expired or already claimed.
    pub fn claim(&self, id: &Uuid) -> Option<PendingRelay> {
        let claimed = self.entries.remove(id).map(|(_, entry)| entry.relay);
        metrics::set_pending_streams(self.entries.len());
        claimed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop streams older than the TTL, cancelling their relays.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.created.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            metrics::set_pending_streams(self.entries.len());
            tracing::info!(removed, "Expired unclaimed streams");
        }
        removed
    }

    /// Cancel every pending stream.
    pub fn clear(&self) {
        self.entries.clear();
        metrics::set_pending_streams(0);
    }

    /// Periodically sweep expired streams until shutdown.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = (self.ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_expired();
                    }
                }
            }

            registry.clear();
            tracing::debug!("Stream sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{spawn_relay, StreamState};
    use crate::upstream::{MockUpstream, Prompt};

    fn pending() -> PendingRelay {
        let backend = Arc::new(MockUpstream::with_tokens(["x", "y"], Duration::from_millis(10)));
        spawn_relay(backend, Prompt::parse("hi").unwrap())
    }

    #[tokio::test]
    async fn test_claim_exactly_once() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let id = registry.insert(pending());
        assert_eq!(registry.len(), 1);

        let relay = registry.claim(&id).expect("first claim succeeds");
        assert_eq!(relay.id(), id);
        assert!(registry.claim(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_claimed_stream_delivers_tokens() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let id = registry.insert(pending());

        let mut stream = registry
            .claim(&id)
            .unwrap()
            .established(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap().as_str(), "x");
        assert_eq!(stream.recv().await.unwrap().as_str(), "y");
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_cancels_expired() {
        let registry = StreamRegistry::new(Duration::ZERO);
        let relay = pending();
        let mut state = relay.state_watch();
        registry.insert(relay);

        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.is_empty());

        let final_state = *state.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(final_state, StreamState::Aborted);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_streams() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        registry.insert(pending());
        assert_eq!(registry.sweep_expired(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_clears_on_shutdown() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        registry.insert(pending());

        let shutdown = CancellationToken::new();
        let handle = registry.spawn_sweeper(shutdown.clone());
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper stops")
            .unwrap();
        assert!(registry.is_empty());
    }
}
