//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::leaky_bucket_server::LeakyBucketServer;
use super::service::LeakyBucketService;
use crate::error::{MeshLimitError, Result};
use crate::mesh::Replica;

/// gRPC server answering peer `Join` and `Sync` calls.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The replica peers talk to
    replica: Arc<Replica>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, replica: Arc<Replica>) -> Self {
        Self { addr, replica }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = LeakyBucketService::new(self.replica);

        info!(
            addr = %self.addr,
            "Starting gRPC server for LeakyBucket peer service"
        );

        Server::builder()
            .add_service(LeakyBucketServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                MeshLimitError::Transport(e)
            })
    }

    /// Serve on an already bound listener, ignoring the configured address.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = LeakyBucketService::new(self.replica);

        info!(addr = ?listener.local_addr().ok(), "Starting gRPC server on bound listener");

        Server::builder()
            .add_service(LeakyBucketServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                MeshLimitError::Transport(e)
            })
    }
}
