//! Error types for the ivy core protocol.
//!
//! Every error is local to one connection: the handler logs it and tears
//! that connection down. Nothing here is process-fatal.

use std::borrow::Cow;
use std::io;

use thiserror::Error;

use crate::identity::PeerId;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Socket read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream cleanly between frames
    #[error("connection closed")]
    Closed,

    /// Length-prefix framing violation
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Structured bytes did not decode to exactly one known message
    #[error("codec error: {0}")]
    Codec(Cow<'static, str>),

    /// A message arrived that is not valid in the current phase
    #[error("protocol violation: {0}")]
    Protocol(Cow<'static, str>),

    /// Handshake signature or handshake message shape rejected
    #[error("authentication failed: {0}")]
    AuthenticationFailed(Cow<'static, str>),

    /// Malformed key material or AEAD failure
    #[error("crypto error: {0}")]
    Crypto(#[from] ivy_crypto::CryptoError),

    /// Identity or address is already registered
    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    /// No active session for this peer
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Peer ID string is not a base64-encoded Ed25519 key
    #[error("invalid peer ID: {0}")]
    InvalidPeerId(String),

    /// Operation timed out
    #[error("timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Node is not in the right lifecycle state for the operation
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

/// Framing errors
#[derive(Debug, Error)]
pub enum FramingError {
    /// Declared or outgoing frame length exceeds the configured bound
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared length
        len: u64,
        /// Configured maximum
        max: usize,
    },

    /// Stream ended inside a frame
    #[error("stream ended mid-frame ({expected} bytes expected)")]
    Truncated {
        /// Bytes the frame still required
        expected: u64,
    },
}

impl Error {
    /// Check whether the peer closed the stream cleanly.
    ///
    /// Clean closes are logged differently but torn down the same way as
    /// every other error.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Short category label used in structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Closed => "closed",
            Error::Framing(_) => "framing",
            Error::Codec(_) => "codec",
            Error::Protocol(_) => "protocol",
            Error::AuthenticationFailed(_) => "authentication",
            Error::Crypto(_) => "crypto",
            Error::RegistryConflict(_) => "registry_conflict",
            Error::UnknownPeer(_) => "unknown_peer",
            Error::InvalidPeerId(_) => "invalid_peer_id",
            Error::Timeout(_) => "timeout",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidState(_) => "invalid_state",
        }
    }
}
