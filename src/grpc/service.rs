//! Peer service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::proto::{
    leaky_bucket_server::LeakyBucket, CapacityBook, JoinRequest, JoinResponse, SyncRequest,
    SyncResponse,
};
use crate::mesh::Replica;

/// Implementation of the `LeakyBucket` peer service over a local replica.
pub struct LeakyBucketService {
    replica: Arc<Replica>,
}

impl LeakyBucketService {
    pub fn new(replica: Arc<Replica>) -> Self {
        Self { replica }
    }
}

#[tonic::async_trait]
impl LeakyBucket for LeakyBucketService {
    /// Hand a joining peer our whole capacity book.
    #[instrument(skip(self, request), fields(peer_timestamp = %request.get_ref().timestamp))]
    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let req = request.into_inner();
        let available_capacity = self.replica.handle_join(&req.timestamp);

        debug!(tenants = available_capacity.len(), "Answering join");

        Ok(Response::new(JoinResponse {
            capacity_book: Some(CapacityBook { available_capacity }),
        }))
    }

    /// Apply a peer's spent capacity.
    #[instrument(skip(self, request))]
    async fn sync(&self, request: Request<SyncRequest>) -> Result<Response<SyncResponse>, Status> {
        let req = request.into_inner();

        let Some(change) = req.capacity_change else {
            warn!("Received sync with no capacity change");
            return Err(Status::invalid_argument("capacity_change is required"));
        };

        debug!(tenants = change.spent_capacity.len(), "Applying peer spend");
        let timestamp = self.replica.handle_sync(&change.spent_capacity);

        Ok(Response::new(SyncResponse { timestamp }))
    }
}
