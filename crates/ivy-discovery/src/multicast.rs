//! UDP multicast announcer and scanner.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::protocol::{Announcement, DiscoveryMessage, MAX_DATAGRAM_SIZE};

/// A node seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Advertised peer ID
    pub peer_id: String,
    /// Source IP of the announcement with the advertised port
    pub addr: SocketAddr,
}

/// What a received datagram asks of us.
#[derive(Debug, PartialEq, Eq)]
enum Datagram {
    Query,
    Peer(DiscoveredPeer),
    Ignored,
}

fn classify(bytes: &[u8], src: SocketAddr, service: &str) -> Datagram {
    let Ok(message) = DiscoveryMessage::from_bytes(bytes) else {
        return Datagram::Ignored;
    };

    // Other software may share the group; only our service counts
    if message.service() != service {
        return Datagram::Ignored;
    }

    match message {
        DiscoveryMessage::Query { .. } => Datagram::Query,
        DiscoveryMessage::Announce(announcement) => Datagram::Peer(DiscoveredPeer {
            peer_id: announcement.peer_id,
            addr: SocketAddr::new(src.ip(), announcement.port),
        }),
    }
}

/// Multicast discovery endpoint for one node.
///
/// Binding starts a listener task that answers queries and buffers
/// announcements until the next [`scan`](Self::scan). The task stops when
/// the endpoint is dropped.
pub struct LanDiscovery {
    socket: Arc<UdpSocket>,
    config: Arc<DiscoveryConfig>,
    local: Announcement,
    group: SocketAddr,
    found: Mutex<mpsc::Receiver<DiscoveredPeer>>,
    listener: JoinHandle<()>,
}

impl LanDiscovery {
    /// Join the multicast group and start listening.
    ///
    /// `peer_id` and `port` are what this node announces.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] for a bad configuration, or
    /// [`DiscoveryError::Io`] if the socket cannot be set up.
    pub async fn bind(
        config: DiscoveryConfig,
        peer_id: impl Into<String>,
        port: u16,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;

        let socket = Arc::new(multicast_socket(&config)?);
        let group = SocketAddr::V4(SocketAddrV4::new(config.group, config.port));
        let local = Announcement {
            service: config.service.clone(),
            peer_id: peer_id.into(),
            port,
        };

        let (found_tx, found) = mpsc::channel(config.buffer_size);
        let listener = tokio::spawn(listen(
            Arc::clone(&socket),
            local.clone(),
            group,
            found_tx,
        ));

        tracing::info!(
            peer = %local.peer_id,
            %group,
            port,
            "broadcasting on local network"
        );

        Ok(Self {
            socket,
            config: Arc::new(config),
            local,
            group,
            found: Mutex::new(found),
            listener,
        })
    }

    /// What this node announces.
    #[must_use]
    pub fn announcement(&self) -> &Announcement {
        &self.local
    }

    /// Send one announcement to the group.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or sending fails.
    pub async fn announce(&self) -> Result<(), DiscoveryError> {
        send(&self.socket, &DiscoveryMessage::Announce(self.local.clone()), self.group).await
    }

    /// Announce every `announce_interval` until the returned task is aborted.
    #[must_use]
    pub fn spawn_announcer(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let message = DiscoveryMessage::Announce(self.local.clone());
        let group = self.group;
        let period = self.config.announce_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = send(&socket, &message, group).await {
                    tracing::warn!(error = %e, "announcement failed");
                }
            }
        })
    }

    /// Query the group and collect announcements for `scan_window`.
    ///
    /// Announcements buffered since the previous scan are included. Each
    /// peer ID appears at most once (latest address wins) and at most
    /// `buffer_size` peers are returned. Our own announcement is included
    /// when multicast loopback is on.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be sent.
    pub async fn scan(&self) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        let mut found = self.found.lock().await;

        let query = DiscoveryMessage::Query {
            service: self.local.service.clone(),
        };
        send(&self.socket, &query, self.group).await?;

        let deadline = Instant::now() + self.config.scan_window;
        let mut peers: HashMap<String, DiscoveredPeer> = HashMap::new();

        while peers.len() < self.config.buffer_size {
            match tokio::time::timeout_at(deadline, found.recv()).await {
                Ok(Some(peer)) => {
                    peers.insert(peer.peer_id.clone(), peer);
                }
                Ok(None) | Err(_) => break,
            }
        }

        tracing::trace!(count = peers.len(), "scan complete");
        Ok(peers.into_values().collect())
    }

    /// Local address of the discovery socket.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] if the address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn multicast_socket(config: &DiscoveryConfig) -> Result<UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // Every node on the host binds the same port
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;

    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port)).into())?;
    socket.join_multicast_v4(&config.group, &config.interface)?;
    socket.set_multicast_loop_v4(config.multicast_loop)?;
    socket.set_multicast_ttl_v4(config.ttl)?;

    // Convert to std socket, then to tokio socket
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

async fn send(
    socket: &UdpSocket,
    message: &DiscoveryMessage,
    group: SocketAddr,
) -> Result<(), DiscoveryError> {
    let bytes = message.to_bytes()?;
    socket.send_to(&bytes, group).await?;
    Ok(())
}

async fn listen(
    socket: Arc<UdpSocket>,
    local: Announcement,
    group: SocketAddr,
    found: mpsc::Sender<DiscoveredPeer>,
) {
    let reply = DiscoveryMessage::Announce(local.clone());
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "discovery receive failed");
                continue;
            }
        };

        match classify(&buf[..len], src, &local.service) {
            Datagram::Query => {
                tracing::trace!(%src, "answering discovery query");
                if let Err(e) = send(&socket, &reply, group).await {
                    tracing::warn!(error = %e, "failed to answer query");
                }
            }
            Datagram::Peer(peer) => {
                // Full buffer: drop until the next scan drains it
                if found.try_send(peer).is_err() {
                    tracing::trace!(%src, "discovery buffer full");
                }
            }
            Datagram::Ignored => tracing::trace!(%src, "ignoring foreign datagram"),
        }
    }
}
