//! gRPC transport for the peer protocol.

mod client;
mod server;
mod service;

pub use client::{GrpcClientFactory, GrpcPeerClient};
pub use server::GrpcServer;
pub use service::LeakyBucketService;

/// Wire messages for the `meshlimit.v1.LeakyBucket` service.
///
/// ```proto
/// service LeakyBucket {
///   rpc Join(JoinRequest) returns (JoinResponse);
///   rpc Sync(SyncRequest) returns (SyncResponse);
/// }
/// ```
pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct JoinRequest {
        /// RFC 3339, UTC
        #[prost(string, tag = "1")]
        pub timestamp: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct JoinResponse {
        #[prost(message, optional, tag = "1")]
        pub capacity_book: Option<CapacityBook>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CapacityBook {
        #[prost(map = "string, double", tag = "1")]
        pub available_capacity: HashMap<String, f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SyncRequest {
        #[prost(message, optional, tag = "1")]
        pub capacity_change: Option<CapacityChange>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CapacityChange {
        #[prost(map = "string, uint64", tag = "1")]
        pub spent_capacity: HashMap<String, u64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SyncResponse {
        #[prost(string, tag = "1")]
        pub timestamp: String,
    }

    include!(concat!(env!("OUT_DIR"), "/meshlimit.v1.LeakyBucket.rs"));
}

pub use proto::leaky_bucket_client::LeakyBucketClient;
pub use proto::leaky_bucket_server::{LeakyBucket, LeakyBucketServer};
