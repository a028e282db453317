//! Discovery datagram format.

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Largest datagram a node sends or reads.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// A node advertising where it accepts connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Service name, `"ivy"` unless configured otherwise
    pub service: String,
    /// Advertised peer ID
    pub peer_id: String,
    /// TCP listen port; the address is taken from the datagram source
    pub port: u16,
}

/// Discovery datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMessage {
    /// Ask every node offering `service` to announce itself
    Query {
        /// Requested service
        service: String,
    },
    /// Self-announcement
    Announce(Announcement),
}

impl DiscoveryMessage {
    /// Serialize message to bytes
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Serialization`] if encoding fails or the
    /// result does not fit in one datagram.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiscoveryError> {
        let bytes =
            bincode::serialize(self).map_err(|e| DiscoveryError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(DiscoveryError::Serialization(format!(
                "message of {} bytes exceeds datagram limit",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Deserialize message from bytes
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Deserialization`] for anything that is not
    /// a discovery message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        bincode::deserialize(bytes).map_err(|e| DiscoveryError::Deserialization(e.to_string()))
    }

    /// Service this message refers to
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            DiscoveryMessage::Query { service } => service,
            DiscoveryMessage::Announce(announcement) => &announcement.service,
        }
    }

    /// Get the message type name
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            DiscoveryMessage::Query { .. } => "Query",
            DiscoveryMessage::Announce(_) => "Announce",
        }
    }
}
