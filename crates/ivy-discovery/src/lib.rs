//! # ivy Discovery
//!
//! Local-network peer discovery for ivy nodes.
//!
//! Nodes join an IPv4 multicast group and exchange two datagrams:
//! - `Query`: asks every node offering the service to announce itself
//! - `Announce`: a node's peer ID and the TCP port it listens on
//!
//! A scan sends one query, then collects announcements for a short window.
//! Nodes also re-announce periodically so late joiners are found without
//! waiting for a query.
//!
//! The crate only produces candidates `(peer ID, address)`; deciding whether
//! to dial them is up to the node.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ivy_discovery::{DiscoveryConfig, LanDiscovery};
//!
//! # async fn example() -> Result<(), ivy_discovery::DiscoveryError> {
//! let discovery = LanDiscovery::bind(DiscoveryConfig::default(), "peer-id", 4000).await?;
//! let _announcer = discovery.spawn_announcer();
//!
//! for peer in discovery.scan().await? {
//!     println!("found {} at {}", peer.peer_id, peer.addr);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod multicast;
pub mod protocol;

pub use config::DiscoveryConfig;
pub use error::DiscoveryError;
pub use multicast::{DiscoveredPeer, LanDiscovery};
pub use protocol::{Announcement, DiscoveryMessage};
