//! Discovery error types.

use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup or I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Datagram is not a discovery message
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
