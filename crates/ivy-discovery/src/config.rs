//! Discovery configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::DiscoveryError;

/// Default service name; announcements for other services are ignored.
pub const DEFAULT_SERVICE: &str = "ivy";

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// IPv4 multicast group
    pub group: Ipv4Addr,
    /// UDP port shared by every node on the LAN
    pub port: u16,
    /// Local interface used to join the group (unspecified = OS default)
    pub interface: Ipv4Addr,
    /// Service name carried in every message
    pub service: String,
    /// Interval between unsolicited announcements
    pub announce_interval: Duration,
    /// Interval between scans
    pub scan_period: Duration,
    /// How long a scan collects announcements
    pub scan_window: Duration,
    /// Maximum peers returned by one scan
    pub buffer_size: usize,
    /// Multicast TTL (1 keeps traffic on the local link)
    pub ttl: u32,
    /// Deliver our own multicast traffic back to this host
    pub multicast_loop: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 255, 73, 86),
            port: 47386,
            interface: Ipv4Addr::UNSPECIFIED,
            service: DEFAULT_SERVICE.to_string(),
            announce_interval: Duration::from_secs(5),
            scan_period: Duration::from_secs(10),
            scan_window: Duration::from_secs(2),
            buffer_size: 256,
            ttl: 1,
            multicast_loop: true,
        }
    }
}

impl DiscoveryConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] for a non-multicast group,
    /// an empty service name, or zero durations and sizes.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if !self.group.is_multicast() {
            return Err(DiscoveryError::InvalidConfig(format!(
                "{} is not a multicast address",
                self.group
            )));
        }
        if self.service.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }
        if self.announce_interval.is_zero()
            || self.scan_period.is_zero()
            || self.scan_window.is_zero()
        {
            return Err(DiscoveryError::InvalidConfig(
                "intervals must be non-zero".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
