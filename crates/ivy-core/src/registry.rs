//! Connection and peer registries.
//!
//! Two independent concurrent maps:
//! - connections, keyed by remote socket address
//! - peers, keyed by [`PeerId`]
//!
//! Each map is internally sharded and locked by `DashMap`; no operation
//! holds locks on both maps at once, and callers never lock externally.
//! The first registration for a key wins. Removal is guarded by the
//! caller's [`ConnectionId`], so a stale handler can never evict a newer
//! registration for the same address or identity.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, mpsc};

use crate::error::{Error, Result};
use crate::handshake::Role;
use crate::identity::PeerId;
use crate::message::PeerMessage;

/// Process-unique identifier of one accepted or dialed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a live connection.
///
/// Clones share the close signal and outbound queue of the same
/// connection. Two handles are the same connection iff their
/// [`ConnectionId`]s match.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    role: Role,
    close: Arc<Notify>,
    outbound: mpsc::Sender<PeerMessage>,
}

impl ConnectionHandle {
    /// Create a handle around the connection's outbound queue.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        role: Role,
        outbound: mpsc::Sender<PeerMessage>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            role,
            close: Arc::new(Notify::new()),
            outbound,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote socket address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local role on this connection.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Ask the owning handler to close the connection.
    ///
    /// The signal is latched: a handler that starts waiting later still
    /// observes it.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Wait until [`close`](Self::close) is called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }

    /// Queue a message for the handler to send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the handler has exited.
    pub async fn send(&self, message: PeerMessage) -> Result<()> {
        self.outbound.send(message).await.map_err(|_| Error::Closed)
    }
}

/// Registered, authenticated peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    peer_id: PeerId,
    handle: ConnectionHandle,
    connected_at: Instant,
}

impl PeerEntry {
    /// Create an entry for a peer whose handshake completed on `handle`.
    #[must_use]
    pub fn new(peer_id: PeerId, handle: ConnectionHandle) -> Self {
        Self {
            peer_id,
            handle,
            connected_at: Instant::now(),
        }
    }

    /// Peer identity.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Connection carrying this peer's session.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Local role on the connection.
    #[must_use]
    pub fn role(&self) -> Role {
        self.handle.role
    }

    /// When the peer was registered.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

/// Connection and peer tables shared by every connection task.
#[derive(Debug, Default)]
pub struct Registries {
    connections: DashMap<SocketAddr, ConnectionHandle>,
    peers: DashMap<PeerId, PeerEntry>,
    next_id: AtomicU64,
}

impl Registries {
    /// Create empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection ID.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Connections
    // ═══════════════════════════════════════════════════════════════════

    /// Register a connection under its remote address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryConflict`] if the address is already active.
    pub fn add_connection(&self, handle: ConnectionHandle) -> Result<()> {
        match self.connections.entry(handle.remote_addr) {
            Entry::Occupied(_) => Err(Error::RegistryConflict(format!(
                "connection {} already active",
                handle.remote_addr
            ))),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the connection for `addr`, whoever owns it.
    pub fn remove_connection(&self, addr: &SocketAddr) -> Option<ConnectionHandle> {
        self.connections.remove(addr).map(|(_, handle)| handle)
    }

    /// Remove the connection for `addr` only if it is connection `id`.
    ///
    /// Returns whether an entry was removed.
    pub fn release_connection(&self, addr: &SocketAddr, id: ConnectionId) -> bool {
        self.connections
            .remove_if(addr, |_, handle| handle.id == id)
            .is_some()
    }

    /// Whether a connection to `addr` is registered.
    #[must_use]
    pub fn is_connection_active(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of all connection handles.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════

    /// Register an authenticated peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryConflict`] if the identity is already
    /// registered. The existing entry is left untouched.
    pub fn add_peer(&self, entry: PeerEntry) -> Result<()> {
        match self.peers.entry(entry.peer_id.clone()) {
            Entry::Occupied(_) => Err(Error::RegistryConflict(format!(
                "peer {} already connected",
                entry.peer_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove `peer_id` only if its entry belongs to connection `id`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove_peer(&self, peer_id: &PeerId, id: ConnectionId) -> bool {
        self.peers
            .remove_if(peer_id, |_, entry| entry.handle.id == id)
            .is_some()
    }

    /// Whether `peer_id` is registered.
    #[must_use]
    pub fn is_peer_active(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Look up a peer entry.
    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<PeerEntry> {
        self.peers.get(peer_id).map(|e| e.value().clone())
    }

    /// Number of registered peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot of all peers, ordered by peer ID.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerEntry> {
        let mut peers: Vec<_> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }
}
