//! Error types for the Meshlimit service.

use thiserror::Error;

/// Main error type for Meshlimit operations.
#[derive(Error, Debug)]
pub enum MeshLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tenant or window limit that cannot be enforced
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// A peer answered, but not with something usable
    #[error("Peer {endpoint} failed: {message}")]
    Peer { endpoint: String, message: String },

    /// gRPC transport errors
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC call errors
    #[error("gRPC status: {0}")]
    Status(#[from] tonic::Status),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MeshLimitError {
    fn from(err: config::ConfigError) -> Self {
        MeshLimitError::Config(err.to_string())
    }
}

/// Result type alias for Meshlimit operations.
pub type Result<T> = std::result::Result<T, MeshLimitError>;
