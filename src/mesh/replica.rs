//! A leaky bucket limiter participating in a peer group.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::peer::{ClientFactory, PeerClient};
use crate::ratelimit::{CapacityBook, LeakyBucketLimiter, SyncDelta};

/// One replica of the leaky bucket limiter and its view of the peer group.
pub struct Replica {
    node_id: String,
    limiter: Arc<LeakyBucketLimiter>,
    factory: Option<Arc<dyn ClientFactory>>,
    peers: RwLock<Vec<Arc<dyn PeerClient>>>,
    peer_timeout: Duration,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("node_id", &self.node_id)
            .field("peers", &self.peer_count())
            .field("peer_timeout", &self.peer_timeout)
            .finish()
    }
}

impl Replica {
    /// Create a replica. Without a factory it never talks to peers.
    ///
    /// `peer_timeout` bounds every individual peer call so one slow peer
    /// cannot hold up the others or the next tick.
    pub fn new(
        node_id: impl Into<String>,
        limiter: Arc<LeakyBucketLimiter>,
        factory: Option<Arc<dyn ClientFactory>>,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            limiter,
            factory,
            peers: RwLock::new(Vec::new()),
            peer_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn limiter(&self) -> &Arc<LeakyBucketLimiter> {
        &self.limiter
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Rebuild peer clients from the factory.
    pub fn refresh_peers(&self) {
        let clients = self
            .factory
            .as_ref()
            .map(|factory| factory.new_clients())
            .unwrap_or_default();

        debug!(node_id = %self.node_id, peers = clients.len(), "Refreshed peer list");
        *self.peers.write() = clients;
    }

    /// Prime the local cache from every peer's capacity book.
    ///
    /// Peers are asked in turn. When several peers report the same tenant
    /// the last answer wins. Unreachable peers are logged and skipped.
    /// Returns how many peers answered.
    pub async fn bootstrap(&self) -> usize {
        self.refresh_peers();
        let timestamp = self.timestamp();
        let mut answered = 0;

        for peer in self.current_peers() {
            match timeout(self.peer_timeout, peer.join(&timestamp)).await {
                Ok(Ok(book)) => {
                    info!(
                        node_id = %self.node_id,
                        peer = %peer.endpoint(),
                        tenants = book.len(),
                        "Joined peer"
                    );
                    for (tenant_id, capacity) in book {
                        self.limiter.prime(&tenant_id, capacity);
                    }
                    answered += 1;
                }
                Ok(Err(e)) => {
                    error!(node_id = %self.node_id, peer = %peer.endpoint(), error = %e, "Join failed");
                }
                Err(_) => {
                    error!(node_id = %self.node_id, peer = %peer.endpoint(), timeout = ?self.peer_timeout, "Join timed out");
                }
            }
        }

        self.refresh_peers();
        answered
    }

    /// Answer a peer's join: our whole capacity book.
    ///
    /// A joining peer means the group changed, so the peer list is
    /// refreshed as well.
    pub fn handle_join(&self, timestamp: &str) -> CapacityBook {
        let book = self.limiter.capacity_book();
        debug!(node_id = %self.node_id, peer_timestamp = %timestamp, tenants = book.len(), "Serving join");
        self.refresh_peers();
        book
    }

    /// Apply spend reported by a peer and answer with our timestamp.
    pub fn handle_sync(&self, delta: &SyncDelta) -> String {
        for (tenant_id, spent) in delta {
            if !self.limiter.debit(tenant_id, *spent) {
                trace!(tenant = %tenant_id, "Ignoring spend for tenant without a limit");
            }
        }
        self.timestamp()
    }

    /// Run one sync tick: drain local spend and push it to every peer.
    ///
    /// Peers are called concurrently, each bounded by the peer timeout.
    /// Failures are logged and not retried; the drained spend is not
    /// restored. Returns how many peers acknowledged.
    pub async fn sync_once(&self) -> usize {
        let delta = self.limiter.drain_spent();
        if delta.is_empty() {
            trace!(node_id = %self.node_id, "Nothing spent since last sync");
            return 0;
        }

        let peers = self.current_peers();
        let delta = &delta;
        let calls = peers.iter().map(|peer| async move {
            match timeout(self.peer_timeout, peer.sync(delta)).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    warn!(node_id = %self.node_id, peer = %peer.endpoint(), error = %e, "Sync failed");
                    false
                }
                Err(_) => {
                    warn!(node_id = %self.node_id, peer = %peer.endpoint(), timeout = ?self.peer_timeout, "Sync timed out");
                    false
                }
            }
        });

        let acknowledged = join_all(calls).await.into_iter().filter(|ok| *ok).count();
        debug!(
            node_id = %self.node_id,
            tenants = delta.len(),
            peers = peers.len(),
            acknowledged,
            "Sync tick complete"
        );
        acknowledged
    }

    /// Start the periodic sync loop on the current tokio runtime.
    ///
    /// The first tick fires one `period` from now. The loop ends when the
    /// returned handle is stopped or dropped.
    pub fn spawn_sync(self: &Arc<Self>, period: Duration) -> SyncHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let replica = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        replica.sync_once().await;
                    }
                }
            }

            info!(node_id = %replica.node_id, "Sync loop stopped");
        });

        SyncHandle {
            stop: stop_tx,
            task,
        }
    }

    fn current_peers(&self) -> Vec<Arc<dyn PeerClient>> {
        self.peers.read().clone()
    }

    fn timestamp(&self) -> String {
        self.limiter.clock().now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Handle to a running sync loop.
pub struct SyncHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop to stop and wait for it to finish. A tick already in
    /// progress completes first.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "Sync loop panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
