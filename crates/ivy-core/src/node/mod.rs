//! Node orchestration layer for ivy
//!
//! The node ties the protocol pieces together:
//! - a TCP listener handing inbound connections to responder handlers
//! - a dialer applying the pre-dial rules to discovery candidates
//! - periodic discovery scans and peer table logging
//! - a broadcast stream of [`NodeEvent`](crate::NodeEvent)s for applications
//!
//! # Example
//!
//! ```no_run
//! use ivy_core::node::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::new_random(NodeConfig::default())?;
//!     let addr = node.serve().await?;
//!     println!("{} listening on {}", node.peer_id(), addr);
//!
//!     let mut events = node.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod candidate;
pub mod config;
#[allow(clippy::module_inception)]
pub mod node;

pub use candidate::{Candidate, CandidateSource};
pub use config::NodeConfig;
pub use node::Node;
