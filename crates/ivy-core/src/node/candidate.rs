//! Dial candidates produced by peer discovery.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::PeerId;

/// A peer advertised on the network, not yet connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Advertised identity
    pub peer_id: PeerId,
    /// Address to dial
    pub addr: SocketAddr,
}

/// Source of dial candidates, polled periodically by the node.
#[async_trait]
pub trait CandidateSource: Send {
    /// Run one scan and return what was found.
    ///
    /// Results may include this node and already-connected peers; the
    /// node filters them before dialing.
    async fn scan(&mut self) -> Result<Vec<Candidate>>;
}
