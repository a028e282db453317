//! Per-connection orchestration.
//!
//! [`ConnectionHandler::handle`] owns one connection from registration to
//! teardown:
//!
//! 1. register the connection under its remote address
//! 2. run the handshake in the given role
//! 3. register the authenticated peer (first identity wins)
//! 4. run the session: read pump, outbound queue, keepalive, close signal
//! 5. deregister and close
//!
//! Step 5 is a drop guard, so it runs on every exit path, including
//! cancellation of the handler task. Deregistration always happens before
//! the stream is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, interval_at};

use crate::error::{Error, Result};
use crate::handshake::{Handshake, Role};
use crate::identity::{Identity, PeerId};
use crate::message::PeerMessage;
use crate::node::NodeConfig;
use crate::registry::{ConnectionHandle, ConnectionId, PeerEntry, Registries};
use crate::session::{SecureSession, SecureWriter};

/// Observable node activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Handshake completed and the peer was registered
    PeerConnected {
        /// Authenticated peer
        peer_id: PeerId,
        /// Remote address of the connection
        addr: SocketAddr,
        /// Local role on the connection
        role: Role,
    },
    /// Text message delivered by a peer
    Message {
        /// Sender
        peer_id: PeerId,
        /// Message body
        text: String,
    },
    /// Peer entry removed after its connection ended
    PeerDisconnected {
        /// Peer that left
        peer_id: PeerId,
    },
}

/// Runs connections against shared node state.
#[derive(Clone)]
pub struct ConnectionHandler {
    identity: Arc<Identity>,
    registries: Arc<Registries>,
    config: Arc<NodeConfig>,
    events: broadcast::Sender<NodeEvent>,
}

impl ConnectionHandler {
    /// Create a handler sharing the node's identity, registries and events.
    #[must_use]
    pub fn new(
        identity: Arc<Identity>,
        registries: Arc<Registries>,
        config: Arc<NodeConfig>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        Self {
            identity,
            registries,
            config,
            events,
        }
    }

    /// Drive one connection until it ends.
    ///
    /// Returns `Ok(())` when the peer closed cleanly or the connection was
    /// closed locally.
    ///
    /// # Errors
    ///
    /// - [`Error::RegistryConflict`] if the address or identity is already
    ///   registered; the connection is dropped without a session
    /// - any handshake or session error that ended the connection
    pub async fn handle<S>(&self, mut stream: S, remote_addr: SocketAddr, role: Role) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(self.config.outbound_queue);
        let handle = ConnectionHandle::new(
            self.registries.next_connection_id(),
            remote_addr,
            role,
            outbound_tx,
        );

        if let Err(e) = self.registries.add_connection(handle.clone()) {
            tracing::warn!(addr = %remote_addr, %role, "rejecting duplicate connection");
            return Err(e);
        }
        let mut cleanup = Cleanup {
            registries: self.registries.as_ref(),
            events: &self.events,
            addr: remote_addr,
            id: handle.id(),
            peer: None,
        };

        tracing::debug!(addr = %remote_addr, %role, conn = %handle.id(), "starting handshake");

        let handshake = Handshake::new(&self.identity, role).run(
            &mut stream,
            self.config.max_frame_size,
            self.config.handshake_timeout,
        );
        let session = tokio::select! {
            result = handshake => result,
            () = handle.closed() => return Ok(()),
        };
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                if e.is_end_of_stream() {
                    tracing::info!(addr = %remote_addr, %role, "peer hung up during handshake");
                } else {
                    tracing::error!(addr = %remote_addr, %role, error = %e, "handshake failed");
                }
                return Err(e);
            }
        };

        let peer_id = session.peer_id().clone();
        tracing::info!(peer = %peer_id, addr = %remote_addr, %role, "handshake complete");

        if let Err(e) = self
            .registries
            .add_peer(PeerEntry::new(peer_id.clone(), handle.clone()))
        {
            tracing::warn!(
                peer = %peer_id,
                addr = %remote_addr,
                "identity already connected, dropping duplicate"
            );
            return Err(e);
        }
        cleanup.peer = Some(peer_id.clone());

        tracing::info!(peer = %peer_id, "peer added");
        let _ = self.events.send(NodeEvent::PeerConnected {
            peer_id: peer_id.clone(),
            addr: remote_addr,
            role,
        });

        let (reader, mut writer) =
            SecureSession::new(stream, session, self.config.max_frame_size).split();
        let mut pump = reader.spawn_pump::<PeerMessage>(
            self.config.outbound_queue,
            Some(self.config.idle_timeout),
        );

        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        let mut ping_seq = 0u64;

        // None: closed locally
        let reason: Option<Error> = loop {
            tokio::select! {
                received = pump.recv() => match received {
                    Ok(message) => {
                        if let Err(e) = self.dispatch(&peer_id, message, &mut writer).await {
                            break Some(e);
                        }
                    }
                    Err(e) => break Some(e),
                },
                Some(message) = outbound_rx.recv() => {
                    if let Err(e) = writer.send(&message).await {
                        break Some(e);
                    }
                }
                _ = keepalive.tick() => {
                    ping_seq = ping_seq.wrapping_add(1);
                    if let Err(e) = writer.send(&PeerMessage::Ping(ping_seq)).await {
                        break Some(e);
                    }
                }
                () = handle.closed() => break None,
            }
        };

        // Deregister before the socket closes, as on the early-return paths
        drop(pump);
        drop(cleanup);
        let _ = writer.shutdown().await;

        match reason {
            None => {
                tracing::info!(peer = %peer_id, "connection closed locally");
                Ok(())
            }
            Some(e) if e.is_end_of_stream() => {
                tracing::info!(peer = %peer_id, "peer closed connection");
                Ok(())
            }
            Some(e) => {
                tracing::error!(peer = %peer_id, kind = e.kind(), error = %e, "session failed");
                Err(e)
            }
        }
    }

    async fn dispatch<W>(
        &self,
        peer_id: &PeerId,
        message: PeerMessage,
        writer: &mut SecureWriter<W>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match message {
            PeerMessage::Text(text) => {
                tracing::debug!(peer = %peer_id, len = text.len(), "message received");
                let _ = self.events.send(NodeEvent::Message {
                    peer_id: peer_id.clone(),
                    text,
                });
            }
            PeerMessage::Ping(seq) => writer.send(&PeerMessage::Pong(seq)).await?,
            PeerMessage::Pong(seq) => tracing::trace!(peer = %peer_id, seq, "pong"),
        }
        Ok(())
    }
}

/// Deregisters the connection (and peer, once registered) on drop.
struct Cleanup<'a> {
    registries: &'a Registries,
    events: &'a broadcast::Sender<NodeEvent>,
    addr: SocketAddr,
    id: ConnectionId,
    peer: Option<PeerId>,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if let Some(peer_id) = self.peer.take() {
            if self.registries.remove_peer(&peer_id, self.id) {
                tracing::info!(peer = %peer_id, "peer removed");
                let _ = self.events.send(NodeEvent::PeerDisconnected { peer_id });
            }
        }
        self.registries.release_connection(&self.addr, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;
    use std::time::Duration;
    use tokio::io::duplex;

    fn handler(identity: Identity, registries: Arc<Registries>) -> ConnectionHandler {
        let (events, _) = broadcast::channel(64);
        ConnectionHandler::new(
            Arc::new(identity),
            registries,
            Arc::new(NodeConfig::default()),
            events,
        )
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_failed_handshake_deregisters_connection() {
        let registries = Arc::new(Registries::new());
        let bob = handler(Identity::generate(), Arc::clone(&registries));
        let (left, right) = duplex(1024);

        // Peer hangs up before sending its handshake
        let task = tokio::spawn(async move { bob.handle(right, addr(7000), Role::Responder).await });
        drop(left);

        assert!(task.await.unwrap().is_err());
        assert!(!registries.is_connection_active(&addr(7000)));
        assert_eq!(registries.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected_before_handshake() {
        let registries = Arc::new(Registries::new());
        let bob = handler(Identity::generate(), Arc::clone(&registries));

        let (_keep, first) = duplex(1024);
        let bob_first = bob.clone();
        let first_task =
            tokio::spawn(async move { bob_first.handle(first, addr(7001), Role::Responder).await });

        // Let the first connection register
        while !registries.is_connection_active(&addr(7001)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (_other, second) = duplex(1024);
        let err = bob
            .handle(second, addr(7001), Role::Responder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistryConflict(_)));

        // The first connection is still registered
        assert!(registries.is_connection_active(&addr(7001)));
        first_task.abort();
    }

    #[tokio::test]
    async fn test_session_teardown_on_peer_close() {
        let alice_registries = Arc::new(Registries::new());
        let bob_registries = Arc::new(Registries::new());
        let alice_identity = Identity::generate();
        let alice_id = alice_identity.peer_id();
        let alice = handler(alice_identity, Arc::clone(&alice_registries));
        let bob = handler(Identity::generate(), Arc::clone(&bob_registries));
        let mut alice_events = alice.events.subscribe();
        let mut bob_events = bob.events.subscribe();

        let (left, right) = duplex(64 * 1024);
        let alice_task =
            tokio::spawn(async move { alice.handle(left, addr(8001), Role::Initiator).await });
        let bob_task =
            tokio::spawn(async move { bob.handle(right, addr(8002), Role::Responder).await });

        let event = bob_events.recv().await.unwrap();
        assert!(matches!(
            event,
            NodeEvent::PeerConnected { ref peer_id, role: Role::Responder, .. } if *peer_id == alice_id
        ));
        assert!(bob_registries.is_peer_active(&alice_id));
        assert!(matches!(
            alice_events.recv().await.unwrap(),
            NodeEvent::PeerConnected { role: Role::Initiator, .. }
        ));

        // Closing Alice's side ends Bob's session with end-of-stream
        alice_registries.peers()[0].handle().close();
        assert!(alice_task.await.unwrap().is_ok());
        assert!(bob_task.await.unwrap().is_ok());

        assert_eq!(
            bob_events.recv().await.unwrap(),
            NodeEvent::PeerDisconnected { peer_id: alice_id.clone() }
        );
        assert!(!bob_registries.is_peer_active(&alice_id));
        assert!(!bob_registries.is_connection_active(&addr(8002)));
        assert_eq!(alice_registries.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_local_close_deregisters_before_stream_closes() {
        let registries = Arc::new(Registries::new());
        let bob = handler(Identity::generate(), Arc::clone(&registries));
        let mut bob_events = bob.events.subscribe();
        let alice = Identity::generate();

        let (mut left, right) = duplex(64 * 1024);
        let bob_task =
            tokio::spawn(async move { bob.handle(right, addr(8101), Role::Responder).await });

        let session = Handshake::new(&alice, Role::Initiator)
            .run(&mut left, DEFAULT_MAX_FRAME_SIZE, Duration::from_secs(5))
            .await
            .unwrap();
        let mut secure = SecureSession::new(left, session, DEFAULT_MAX_FRAME_SIZE);

        assert!(matches!(
            bob_events.recv().await.unwrap(),
            NodeEvent::PeerConnected { .. }
        ));
        registries.peers()[0].handle().close();

        // By the time end-of-stream reaches Alice, Bob has forgotten her
        let err = secure.receive::<PeerMessage>().await.unwrap_err();
        assert!(err.is_end_of_stream());
        assert_eq!(registries.peer_count(), 0);
        assert!(!registries.is_connection_active(&addr(8101)));

        assert!(bob_task.await.unwrap().is_ok());
    }
}
