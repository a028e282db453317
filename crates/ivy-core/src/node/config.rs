//! Node configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame::DEFAULT_MAX_FRAME_SIZE;

/// Smallest frame bound that still fits a handshake message.
const MIN_FRAME_SIZE: usize = 256;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address for incoming connections (port 0 picks one)
    pub listen_addr: SocketAddr,

    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,

    /// Bound on each handshake read and write
    pub handshake_timeout: Duration,

    /// Session is torn down after this long without an incoming message
    pub idle_timeout: Duration,

    /// Interval between keepalive pings on an idle session
    pub keepalive_interval: Duration,

    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,

    /// Capacity of the node event broadcast channel
    pub event_capacity: usize,

    /// Interval between peer table log lines
    pub peer_display_interval: Duration,

    /// Pause after a failed accept before accepting again
    pub accept_backoff: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(15),
            outbound_queue: 64,
            event_capacity: 256,
            peer_display_interval: Duration::from_secs(15),
            accept_backoff: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    /// Check the configuration for values that would break sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(Error::InvalidConfig(
                format!("max_frame_size must be at least {MIN_FRAME_SIZE} bytes").into(),
            ));
        }

        for (name, value) in [
            ("handshake_timeout", self.handshake_timeout),
            ("idle_timeout", self.idle_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("peer_display_interval", self.peer_display_interval),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero").into()));
            }
        }

        // An idle session must see at least one keepalive before it expires
        if self.keepalive_interval >= self.idle_timeout {
            return Err(Error::InvalidConfig(
                "keepalive_interval must be shorter than idle_timeout".into(),
            ));
        }

        if self.outbound_queue == 0 || self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue capacities must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
