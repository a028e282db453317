//! ivy node: listener, dialer and background loops around shared registries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::handler::{ConnectionHandler, NodeEvent};
use crate::handshake::Role;
use crate::identity::{Identity, PeerId};
use crate::message::PeerMessage;
use crate::node::candidate::{Candidate, CandidateSource};
use crate::node::config::NodeConfig;
use crate::registry::{PeerEntry, Registries};

/// Node inner state
pub(crate) struct NodeInner {
    /// Node identity
    pub(crate) identity: Arc<Identity>,
    /// Node configuration
    pub(crate) config: Arc<NodeConfig>,
    /// Connection and peer tables
    pub(crate) registries: Arc<Registries>,
    /// Event fan-out
    pub(crate) events: broadcast::Sender<NodeEvent>,
    /// Node running state
    pub(crate) running: AtomicBool,
    /// Bound listener address
    pub(crate) local_addr: Mutex<Option<SocketAddr>>,
    /// Background tasks owned by the node
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// ivy overlay node
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Constructors
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Create node from an identity and configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected.
    pub fn new(identity: Identity, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);

        let inner = NodeInner {
            identity: Arc::new(identity),
            config: Arc::new(config),
            registries: Arc::new(Registries::new()),
            events,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create node with a fresh random identity
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected.
    pub fn new_random(config: NodeConfig) -> Result<Self> {
        Self::new(Identity::generate(), config)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Accessors
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// This node's peer ID
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.inner.identity.peer_id()
    }

    /// Node identity
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.inner.identity
    }

    /// Node configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Shared connection and peer registries
    #[must_use]
    pub fn registries(&self) -> &Arc<Registries> {
        &self.inner.registries
    }

    /// Subscribe to node events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of connected peers
    #[must_use]
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.inner.registries.peers()
    }

    /// Listener address, once [`serve`](Self::serve) has bound it
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().await
    }

    /// Check if node is serving
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn handler(&self) -> ConnectionHandler {
        ConnectionHandler::new(
            Arc::clone(&self.inner.identity),
            Arc::clone(&self.inner.registries),
            Arc::clone(&self.inner.config),
            self.inner.events.clone(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle Methods
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Bind the listener and start accepting connections
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if already serving, or [`Error::Io`]
    /// if the bind fails. Only the bind is fatal; accept errors are logged
    /// and retried.
    pub async fn serve(&self) -> Result<SocketAddr> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("node already serving".into()));
        }

        let listener = match TcpListener::bind(self.inner.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        *self.inner.local_addr.lock().await = Some(addr);

        tracing::info!(peer = %self.peer_id(), %addr, "listening");

        let node = self.clone();
        let task = tokio::spawn(async move { node.accept_loop(listener).await });
        self.inner.tasks.lock().await.push(task);

        Ok(addr)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::trace!(%addr, "new inbound connection");
                    if self.inner.registries.is_connection_active(&addr) {
                        tracing::warn!(%addr, "address already connected, closing");
                        continue;
                    }
                    self.spawn_handler(stream, addr, Role::Responder);
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(self.inner.config.accept_backoff).await;
                }
            }
        }
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }

        for handle in self.inner.registries.connections() {
            tracing::debug!(addr = %handle.remote_addr(), "closing connection");
            handle.close();
        }

        tracing::info!(peer = %self.peer_id(), "node stopped");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Connections
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Dial a discovered candidate
    ///
    /// Skips this node itself, identities that are already connected, and
    /// addresses with a live connection. Returns whether a dial was made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Timeout`] if the TCP connect fails.
    pub async fn dial(&self, candidate: Candidate) -> Result<bool> {
        if candidate.peer_id == self.peer_id() {
            return Ok(false);
        }
        if self.inner.registries.is_peer_active(&candidate.peer_id)
            || self.inner.registries.is_connection_active(&candidate.addr)
        {
            return Ok(false);
        }

        tracing::debug!(peer = %candidate.peer_id, addr = %candidate.addr, "dialing candidate");
        self.connect(candidate.addr).await?;
        Ok(true)
    }

    /// Dial an address whose identity is not known in advance
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryConflict`] if the address is already
    /// connected, or [`Error::Io`]/[`Error::Timeout`] if the connect fails.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        if self.inner.registries.is_connection_active(&addr) {
            return Err(Error::RegistryConflict(format!(
                "connection {addr} already active"
            )));
        }

        let stream = tokio::time::timeout(
            self.inner.config.handshake_timeout,
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| Error::Timeout(format!("connect to {addr}").into()))??;

        let remote = stream.peer_addr()?;
        self.spawn_handler(stream, remote, Role::Initiator);
        Ok(())
    }

    fn spawn_handler(&self, stream: TcpStream, addr: SocketAddr, role: Role) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        let handler = self.handler();
        tokio::spawn(async move {
            // Handler logs its own failures
            let _ = handler.handle(stream, addr, role).await;
        });
    }

    /// Queue a message for a connected peer
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPeer`] if the peer is not connected, or
    /// [`Error::Closed`] if its connection is shutting down.
    pub async fn send(&self, peer_id: &PeerId, message: PeerMessage) -> Result<()> {
        let entry = self
            .inner
            .registries
            .peer(peer_id)
            .ok_or_else(|| Error::UnknownPeer(peer_id.clone()))?;
        entry.handle().send(message).await
    }

    /// Queue a text message for a connected peer
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, peer_id: &PeerId, text: impl Into<String>) -> Result<()> {
        self.send(peer_id, PeerMessage::Text(text.into())).await
    }

    /// Close the connection to a peer
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPeer`] if the peer is not connected.
    pub fn disconnect(&self, peer_id: &PeerId) -> Result<()> {
        let entry = self
            .inner
            .registries
            .peer(peer_id)
            .ok_or_else(|| Error::UnknownPeer(peer_id.clone()))?;
        entry.handle().close();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Background Loops
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Scan `source` every `period` and dial what it finds
    ///
    /// Each candidate is dialed on its own task so one unreachable address
    /// does not hold up the rest. Runs until the task is dropped; scan and
    /// dial failures are logged and the next period proceeds normally.
    pub async fn run_discovery(&self, source: &mut dyn CandidateSource, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let candidates = match source.scan().await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(error = %e, "discovery scan failed");
                    continue;
                }
            };

            for candidate in candidates {
                tracing::trace!(peer = %candidate.peer_id, addr = %candidate.addr, "discovered");
                let node = self.clone();
                tokio::spawn(async move {
                    let addr = candidate.addr;
                    if let Err(e) = node.dial(candidate).await {
                        tracing::warn!(%addr, error = %e, "dial failed");
                    }
                });
            }
        }
    }

    /// Log the peer table every `peer_display_interval`
    pub async fn peer_display_loop(&self) {
        let period = self.inner.config.peer_display_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;

            let peers = self.peers();
            tracing::info!(count = peers.len(), "connected peers");
            for entry in peers {
                tracing::info!(
                    peer = %entry.peer_id(),
                    addr = %entry.handle().remote_addr(),
                    role = %entry.role(),
                    uptime_secs = entry.connected_at().elapsed().as_secs(),
                    "peer"
                );
            }
        }
    }
}
