//! Configuration management for Meshlimit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{MeshLimitError, Result};
use crate::ratelimit::{SlidingWindowConfig, StaticTenancy, TenantLimit};

/// Prefix for environment overrides, e.g. `MESHLIMIT_MESH__SYNC_INTERVAL_MS`.
const ENV_PREFIX: &str = "MESHLIMIT";

/// Main configuration for the Meshlimit service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshLimitConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission algorithm and tenant limits
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Peer group configuration
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the peer gRPC service listens on
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Address peers reach this replica on, if different from `grpc_addr`
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            advertise_addr: None,
        }
    }
}

impl ServerConfig {
    /// The endpoint peers use for this replica.
    pub fn advertised_endpoint(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.grpc_addr.to_string())
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 49238))
}

/// Which admission algorithm to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    LeakyBucket,
    SlidingWindow,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Maximum number of tenants tracked at once
    #[serde(default = "default_tenant_capacity")]
    pub tenant_capacity: usize,

    /// Limit for tenants without an override. Without one, only listed
    /// tenants are limited and all other identifiers are ignored.
    #[serde(default)]
    pub default_limit: Option<TenantLimit>,

    /// Per-tenant overrides
    #[serde(default)]
    pub tenants: HashMap<String, TenantLimit>,

    #[serde(default)]
    pub sliding_window: SlidingWindowSettings,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            tenant_capacity: default_tenant_capacity(),
            default_limit: None,
            tenants: HashMap::new(),
            sliding_window: SlidingWindowSettings::default(),
        }
    }
}

fn default_tenant_capacity() -> usize {
    10_000
}

/// Sliding window parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowSettings {
    #[serde(default = "default_request_limit")]
    pub request_limit: u32,

    #[serde(default = "default_full_interval_secs")]
    pub full_interval_secs: u64,

    #[serde(default = "default_sub_interval_count")]
    pub sub_interval_count: u32,
}

impl Default for SlidingWindowSettings {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            full_interval_secs: default_full_interval_secs(),
            sub_interval_count: default_sub_interval_count(),
        }
    }
}

fn default_request_limit() -> u32 {
    100
}

fn default_full_interval_secs() -> u64 {
    3600
}

fn default_sub_interval_count() -> u32 {
    10
}

/// Peer group configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Identifier used in logs
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Peer endpoints (`host:port`)
    #[serde(default)]
    pub peers: Vec<String>,

    /// How often spent capacity is pushed to peers
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Bound on a single peer call; defaults to the sync interval
    #[serde(default)]
    pub peer_timeout_ms: Option<u64>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            peers: Vec::new(),
            sync_interval_ms: default_sync_interval_ms(),
            peer_timeout_ms: None,
        }
    }
}

impl MeshConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms.unwrap_or(self.sync_interval_ms))
    }
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_sync_interval_ms() -> u64 {
    10_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MeshLimitConfig {
    /// Load configuration from an optional YAML file, overlaid with
    /// `MESHLIMIT_*` environment variables (`__` separates nesting levels).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        let config: MeshLimitConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mesh.peers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MeshLimitError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Reject settings the limiters cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.tenant_capacity()?;
        if let Some(limit) = &self.limiter.default_limit {
            limit.validate()?;
        }
        for (tenant, limit) in &self.limiter.tenants {
            limit
                .validate()
                .map_err(|e| MeshLimitError::Config(format!("tenant {}: {}", tenant, e)))?;
        }
        self.sliding_window()?;
        if self.mesh.sync_interval_ms == 0 {
            return Err(MeshLimitError::Config(
                "mesh.sync_interval_ms must be positive".to_string(),
            ));
        }
        if self.mesh.peer_timeout_ms == Some(0) {
            return Err(MeshLimitError::Config(
                "mesh.peer_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tenant_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.limiter.tenant_capacity).ok_or_else(|| {
            MeshLimitError::Config("limiter.tenant_capacity must be positive".to_string())
        })
    }

    pub fn tenancy(&self) -> StaticTenancy {
        StaticTenancy::new(self.limiter.default_limit, self.limiter.tenants.clone())
    }

    pub fn sliding_window(&self) -> Result<SlidingWindowConfig> {
        let settings = &self.limiter.sliding_window;
        let request_limit = u8::try_from(settings.request_limit).map_err(|_| {
            MeshLimitError::InvalidLimit(format!(
                "sliding window request limit {} exceeds {}",
                settings.request_limit,
                u8::MAX
            ))
        })?;
        SlidingWindowConfig::new(
            request_limit,
            Duration::from_secs(settings.full_interval_secs),
            settings.sub_interval_count,
        )
    }
}
