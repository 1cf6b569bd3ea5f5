//! gRPC peer clients.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::warn;

use super::proto::{
    leaky_bucket_client::LeakyBucketClient, CapacityChange, JoinRequest, SyncRequest,
};
use crate::error::{MeshLimitError, Result};
use crate::mesh::{ClientFactory, PeerClient, PeerListProvider};
use crate::ratelimit::{CapacityBook, SyncDelta};

/// A [`PeerClient`] speaking to a remote replica over gRPC.
///
/// The channel connects lazily, so building a client never blocks and an
/// unreachable peer only surfaces as a failed call.
#[derive(Debug, Clone)]
pub struct GrpcPeerClient {
    endpoint: String,
    client: LeakyBucketClient<Channel>,
}

impl GrpcPeerClient {
    /// Build a client for `endpoint` (`host:port` or a full URI). Must be
    /// called inside a tokio runtime.
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let uri = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        let channel = Endpoint::from_shared(uri)?.connect_lazy();

        Ok(Self {
            endpoint: endpoint.to_string(),
            client: LeakyBucketClient::new(channel),
        })
    }

    fn peer_error(&self, status: tonic::Status) -> MeshLimitError {
        MeshLimitError::Peer {
            endpoint: self.endpoint.clone(),
            message: format!("{}: {}", status.code(), status.message()),
        }
    }
}

#[async_trait]
impl PeerClient for GrpcPeerClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn join(&self, timestamp: &str) -> Result<CapacityBook> {
        let mut client = self.client.clone();
        let response = client
            .join(JoinRequest {
                timestamp: timestamp.to_string(),
            })
            .await
            .map_err(|status| self.peer_error(status))?;

        Ok(response
            .into_inner()
            .capacity_book
            .map(|book| book.available_capacity)
            .unwrap_or_default())
    }

    async fn sync(&self, delta: &SyncDelta) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .sync(SyncRequest {
                capacity_change: Some(CapacityChange {
                    spent_capacity: delta.clone(),
                }),
            })
            .await
            .map_err(|status| self.peer_error(status))?;

        Ok(response.into_inner().timestamp)
    }
}

/// Builds gRPC clients for whatever the peer list currently holds,
/// skipping this replica's own address.
pub struct GrpcClientFactory {
    peers: Arc<dyn PeerListProvider>,
    self_endpoint: Option<String>,
}

impl GrpcClientFactory {
    pub fn new(peers: Arc<dyn PeerListProvider>, self_endpoint: Option<String>) -> Self {
        Self {
            peers,
            self_endpoint,
        }
    }
}

impl ClientFactory for GrpcClientFactory {
    fn new_clients(&self) -> Vec<Arc<dyn PeerClient>> {
        self.peers
            .peers()
            .into_iter()
            .filter(|endpoint| self.self_endpoint.as_deref() != Some(endpoint.as_str()))
            .filter_map(|endpoint| match GrpcPeerClient::connect_lazy(&endpoint) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn PeerClient>),
                Err(e) => {
                    warn!(peer = %endpoint, error = %e, "Skipping peer with invalid endpoint");
                    None
                }
            })
            .collect()
    }
}
