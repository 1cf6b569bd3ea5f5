//! Peer-facing abstractions, independent of the wire transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::ratelimit::{CapacityBook, SyncDelta};

/// A connection to one peer replica.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Address of the peer, for logging.
    fn endpoint(&self) -> &str;

    /// Ask the peer for its whole capacity book.
    async fn join(&self, timestamp: &str) -> Result<CapacityBook>;

    /// Push locally spent capacity to the peer. Returns the peer's
    /// timestamp.
    async fn sync(&self, delta: &SyncDelta) -> Result<String>;
}

/// Supplies the current peer endpoints.
pub trait PeerListProvider: Send + Sync {
    fn peers(&self) -> Vec<String>;
}

impl<F> PeerListProvider for F
where
    F: Fn() -> Vec<String> + Send + Sync,
{
    fn peers(&self) -> Vec<String> {
        self()
    }
}

/// A fixed list of peers, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPeers(pub Vec<String>);

impl PeerListProvider for StaticPeers {
    fn peers(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Builds clients for the current peer list.
pub trait ClientFactory: Send + Sync {
    fn new_clients(&self) -> Vec<Arc<dyn PeerClient>>;
}
