//! Configuration file for the ivy CLI.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use ivy_discovery::DiscoveryConfig as LanConfig;
use serde::{Deserialize, Serialize};

/// ivy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeSection,
    /// Discovery configuration
    pub discovery: DiscoverySection,
    /// Logging configuration
    pub logging: LoggingSection,
}

/// `[node]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// TCP listen address
    pub listen_addr: String,
    /// Largest accepted frame in bytes
    pub max_frame_size: usize,
    /// Handshake timeout in seconds
    pub handshake_timeout_secs: u64,
    /// Idle read timeout in seconds
    pub idle_timeout_secs: u64,
    /// Keepalive ping interval in seconds
    pub keepalive_interval_secs: u64,
    /// Messages buffered per peer before senders wait
    pub outbound_queue: usize,
    /// Peer table log interval in seconds
    pub peer_display_interval_secs: u64,
}

/// `[discovery]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Run multicast discovery
    pub enabled: bool,
    /// IPv4 multicast group
    pub group: String,
    /// Multicast UDP port
    pub port: u16,
    /// Service name
    pub service: String,
    /// Announcement interval in seconds
    pub announce_interval_secs: u64,
    /// Scan interval in seconds
    pub scan_period_secs: u64,
    /// Scan collection window in milliseconds
    pub scan_window_ms: u64,
    /// Maximum peers per scan
    pub buffer_size: usize,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level
    pub level: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let defaults = ivy_core::NodeConfig::default();
        Self {
            listen_addr: defaults.listen_addr.to_string(),
            max_frame_size: defaults.max_frame_size,
            handshake_timeout_secs: defaults.handshake_timeout.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            keepalive_interval_secs: defaults.keepalive_interval.as_secs(),
            outbound_queue: defaults.outbound_queue,
            peer_display_interval_secs: defaults.peer_display_interval.as_secs(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let defaults = LanConfig::default();
        Self {
            enabled: true,
            group: defaults.group.to_string(),
            port: defaults.port,
            service: defaults.service,
            announce_interval_secs: defaults.announce_interval.as_secs(),
            scan_period_secs: defaults.scan_period.as_secs(),
            scan_window_ms: u64::try_from(defaults.scan_window.as_millis()).unwrap_or(u64::MAX),
            buffer_size: defaults.buffer_size,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.as_ref().exists() => Self::load(path),
            Some(path) => {
                tracing::debug!(path = %path.as_ref().display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.node_config()?.validate()?;

        if self.discovery.enabled {
            self.discovery_config()?.validate()?;
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    /// Build the node configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be parsed.
    pub fn node_config(&self) -> anyhow::Result<ivy_core::NodeConfig> {
        let listen_addr: SocketAddr = self
            .node
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {e}", self.node.listen_addr))?;

        Ok(ivy_core::NodeConfig {
            listen_addr,
            max_frame_size: self.node.max_frame_size,
            handshake_timeout: Duration::from_secs(self.node.handshake_timeout_secs),
            idle_timeout: Duration::from_secs(self.node.idle_timeout_secs),
            keepalive_interval: Duration::from_secs(self.node.keepalive_interval_secs),
            outbound_queue: self.node.outbound_queue,
            peer_display_interval: Duration::from_secs(self.node.peer_display_interval_secs),
            ..ivy_core::NodeConfig::default()
        })
    }

    /// Build the discovery configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the multicast group cannot be parsed.
    pub fn discovery_config(&self) -> anyhow::Result<LanConfig> {
        let group: Ipv4Addr = self
            .discovery
            .group
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid multicast group '{}': {e}", self.discovery.group))?;

        Ok(LanConfig {
            group,
            port: self.discovery.port,
            service: self.discovery.service.clone(),
            announce_interval: Duration::from_secs(self.discovery.announce_interval_secs),
            scan_period: Duration::from_secs(self.discovery.scan_period_secs),
            scan_window: Duration::from_millis(self.discovery.scan_window_ms),
            buffer_size: self.discovery.buffer_size,
            ..LanConfig::default()
        })
    }
}
