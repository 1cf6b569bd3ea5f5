//! Peer capacity reconciliation between limiter replicas.
//!
//! Replicas of the leaky bucket limiter exchange capacity over two calls:
//! `Join`, through which a starting replica copies every peer's capacity
//! book, and `Sync`, through which each replica periodically pushes the
//! capacity its tenants spent since the previous tick. The scheme is
//! eventually consistent: between two ticks a tenant spreading traffic over
//! `N` replicas can be admitted up to `N` bursts.

mod peer;
mod replica;

pub use peer::{ClientFactory, PeerClient, PeerListProvider, StaticPeers};
pub use replica::{Replica, SyncHandle};
pub use crate::ratelimit::{CapacityBook, SyncDelta};
