use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meshlimit::clock::SystemClock;
use meshlimit::config::{Algorithm, LoggingConfig, MeshLimitConfig};
use meshlimit::grpc::{GrpcClientFactory, GrpcServer};
use meshlimit::mesh::{Replica, StaticPeers};
use meshlimit::ratelimit::{LeakyBucketLimiter, SlidingWindowLimiter};

#[derive(Debug, Parser)]
#[command(name = "meshlimit", version, about = "Per-tenant admission control")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address the peer gRPC service listens on
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Peer endpoint (`host:port`), may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Admission algorithm
    #[arg(long, value_enum)]
    algorithm: Option<Algorithm>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MeshLimitConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if !args.peers.is_empty() {
        config.mesh.peers = args.peers;
    }
    if let Some(algorithm) = args.algorithm {
        config.limiter.algorithm = algorithm;
    }

    init_tracing(&config.logging);

    info!("Starting Meshlimit Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    info!(
        node_id = %config.mesh.node_id,
        algorithm = ?config.limiter.algorithm,
        tenant_capacity = config.limiter.tenant_capacity,
        "Configuration loaded"
    );

    match config.limiter.algorithm {
        Algorithm::LeakyBucket => run_leaky_bucket(config).await?,
        Algorithm::SlidingWindow => run_sliding_window(config).await?,
    }

    info!("Meshlimit Admission Control Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_leaky_bucket(config: MeshLimitConfig) -> anyhow::Result<()> {
    let limiter = Arc::new(LeakyBucketLimiter::new(
        config.tenant_capacity()?,
        Arc::new(config.tenancy()),
        Arc::new(SystemClock),
    ));

    let self_endpoint = config.server.advertised_endpoint();
    let factory = GrpcClientFactory::new(
        Arc::new(StaticPeers(config.mesh.peers.clone())),
        Some(self_endpoint),
    );
    let replica = Arc::new(Replica::new(
        config.mesh.node_id.clone(),
        limiter,
        Some(Arc::new(factory)),
        config.mesh.peer_timeout(),
    ));
    info!(peers = config.mesh.peers.len(), "Leaky bucket replica initialized");

    let (server_stop, server_stopped) = oneshot::channel::<()>();
    let server = GrpcServer::new(config.server.grpc_addr, Arc::clone(&replica));
    let mut serving = tokio::spawn(server.serve_with_shutdown(async move {
        let _ = server_stopped.await;
    }));

    let primed = replica.bootstrap().await;
    info!(tenants = primed, "Bootstrap from peers finished");

    let sync = replica.spawn_sync(config.mesh.sync_interval());

    let server_result = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut serving => Some(result),
    };

    sync.stop().await;
    info!("Peer sync stopped");

    let result = match server_result {
        Some(result) => result,
        None => {
            let _ = server_stop.send(());
            serving.await
        }
    };
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "gRPC server exited with error");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_sliding_window(config: MeshLimitConfig) -> anyhow::Result<()> {
    let limiter = SlidingWindowLimiter::new(
        config.sliding_window()?,
        config.tenant_capacity()?,
        Arc::new(SystemClock),
    );
    info!(
        request_limit = limiter.config().request_limit(),
        full_interval = ?limiter.config().full_interval(),
        sub_intervals = limiter.config().sub_interval_count(),
        "Sliding window limiter initialized"
    );
    if !config.mesh.peers.is_empty() {
        warn!(
            peers = config.mesh.peers.len(),
            "Sliding window has no peer protocol, mesh is disabled"
        );
    } else {
        info!("Sliding window has no peer protocol, mesh is disabled");
    }

    shutdown_signal().await;
    info!(tenants = limiter.tenant_count(), "Sliding window limiter stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
