//! Signed ephemeral key exchange.
//!
//! Each side sends one [`HandshakeMessage`] carrying its long-term Ed25519
//! key, a fresh X25519 key for this connection, and a signature binding the
//! two. Once the peer's message verifies, both sides run X25519 and derive
//! the session cipher.
//!
//! The initiator writes first and the responder reads first, so neither
//! side blocks waiting for the other on a duplex stream.
//!
//! ```text
//!  Initiator                                  Responder
//!  Init ── send own ──> SentOwnMessage        Init ──> AwaitPeerMessage
//!                            │                              │ read + verify
//!                            │                          Verified ── send own
//!                            │ read + verify                │
//!                        Verified                           │
//!                            │ X25519 + KDF                 │ X25519 + KDF
//!                       KeyDerived                     KeyDerived
//! ```
//!
//! Any error moves the handshake to `Failed`; no partial session is ever
//! exposed. The signature covers only the ephemeral public key, there is
//! no challenge from the peer.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use ivy_crypto::session::{Direction, SessionCipher};
use ivy_crypto::signatures::{Signature, VerifyingKey};
use ivy_crypto::x25519::{self, EphemeralSecret};
use rand_core::OsRng;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::identity::{Identity, PeerId};
use crate::message::{HandshakeMessage, WireMessage, read_message, write_message};

/// Which side of the connection this node is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dialed the connection; writes its handshake first
    Initiator,
    /// Accepted the connection; reads the peer's handshake first
    Responder,
}

impl Role {
    /// Direction of traffic this side sends in.
    #[must_use]
    pub fn outbound_direction(self) -> Direction {
        match self {
            Role::Initiator => Direction::InitiatorToResponder,
            Role::Responder => Direction::ResponderToInitiator,
        }
    }

    /// Lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Ephemeral key generated, nothing exchanged
    Init,
    /// Initiator: own message written, waiting for the peer's
    SentOwnMessage,
    /// Responder: waiting for the peer's message
    AwaitPeerMessage,
    /// Peer's message verified
    Verified,
    /// Session cipher derived
    KeyDerived,
    /// Handshake aborted
    Failed,
}

/// Authenticated result of a completed handshake.
pub struct Session {
    peer_id: PeerId,
    peer_signing_key: VerifyingKey,
    peer_transport_key: x25519::PublicKey,
    role: Role,
    cipher: SessionCipher,
}

impl Session {
    /// Authenticated peer identity.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Peer's long-term verifying key.
    #[must_use]
    pub fn peer_signing_key(&self) -> &VerifyingKey {
        &self.peer_signing_key
    }

    /// Peer's ephemeral X25519 key for this connection.
    #[must_use]
    pub fn peer_transport_key(&self) -> &x25519::PublicKey {
        &self.peer_transport_key
    }

    /// Local role in the handshake.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Consume the session, yielding its cipher.
    #[must_use]
    pub fn into_cipher(self) -> SessionCipher {
        self.cipher
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

struct VerifiedPeer {
    signing_key: VerifyingKey,
    transport_key: x25519::PublicKey,
}

enum HandshakeState {
    Init {
        ephemeral: EphemeralSecret,
    },
    SentOwnMessage {
        ephemeral: EphemeralSecret,
    },
    AwaitPeerMessage {
        ephemeral: EphemeralSecret,
    },
    Verified {
        ephemeral: EphemeralSecret,
        peer: VerifiedPeer,
    },
    KeyDerived(Session),
    Failed,
}

impl HandshakeState {
    fn phase(&self) -> HandshakePhase {
        match self {
            HandshakeState::Init { .. } => HandshakePhase::Init,
            HandshakeState::SentOwnMessage { .. } => HandshakePhase::SentOwnMessage,
            HandshakeState::AwaitPeerMessage { .. } => HandshakePhase::AwaitPeerMessage,
            HandshakeState::Verified { .. } => HandshakePhase::Verified,
            HandshakeState::KeyDerived(_) => HandshakePhase::KeyDerived,
            HandshakeState::Failed => HandshakePhase::Failed,
        }
    }
}

/// One handshake over one connection.
///
/// The step methods ([`begin`](Self::begin),
/// [`read_peer_message`](Self::read_peer_message), [`derive`](Self::derive))
/// drive the state machine without I/O; [`run`](Self::run) drives it over a
/// stream.
pub struct Handshake<'a> {
    identity: &'a Identity,
    role: Role,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    /// Start a handshake with a freshly generated ephemeral key.
    #[must_use]
    pub fn new(identity: &'a Identity, role: Role) -> Self {
        Self {
            identity,
            role,
            state: HandshakeState::Init {
                ephemeral: EphemeralSecret::generate(&mut OsRng),
            },
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.state.phase()
    }

    /// Local role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Leave `Init`. The initiator gets its own message to send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the handshake is in `Init`.
    pub fn begin(&mut self) -> Result<Option<WireMessage>> {
        let HandshakeState::Init { ephemeral } = self.take_state() else {
            return Err(Error::InvalidState("handshake already started".into()));
        };

        match self.role {
            Role::Initiator => {
                let message = self.own_message(&ephemeral);
                self.transition(HandshakeState::SentOwnMessage { ephemeral });
                Ok(Some(message))
            }
            Role::Responder => {
                self.transition(HandshakeState::AwaitPeerMessage { ephemeral });
                Ok(None)
            }
        }
    }

    /// Accept the peer's handshake message.
    ///
    /// On success the handshake is `Verified`. The responder gets its own
    /// message to send back.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if the message is not a handshake
    ///   or its signature does not verify
    /// - [`Error::Crypto`] if the key bytes are malformed
    /// - [`Error::InvalidState`] if no peer message is expected
    pub fn read_peer_message(&mut self, message: WireMessage) -> Result<Option<WireMessage>> {
        let ephemeral = match self.take_state() {
            HandshakeState::SentOwnMessage { ephemeral }
            | HandshakeState::AwaitPeerMessage { ephemeral } => ephemeral,
            _ => return Err(Error::InvalidState("not awaiting a peer handshake".into())),
        };

        let received = message.message_type();
        let WireMessage::Handshake(handshake) = message else {
            return Err(Error::AuthenticationFailed(
                format!("expected Handshake during setup, got {received}").into(),
            ));
        };

        let peer = verify_handshake_message(&handshake)?;

        let reply = match self.role {
            Role::Responder => Some(self.own_message(&ephemeral)),
            Role::Initiator => None,
        };

        self.transition(HandshakeState::Verified { ephemeral, peer });
        Ok(reply)
    }

    /// Run X25519 with the verified peer and derive the session cipher.
    ///
    /// # Errors
    ///
    /// - [`Error::Crypto`] if the exchange yields a low-order secret
    /// - [`Error::InvalidState`] unless the handshake is `Verified`
    pub fn derive(&mut self) -> Result<()> {
        let HandshakeState::Verified { ephemeral, peer } = self.take_state() else {
            return Err(Error::InvalidState("peer not verified".into()));
        };

        let shared = ephemeral.exchange(&peer.transport_key)?;
        let cipher = SessionCipher::from_shared_secret(&shared, self.role.outbound_direction());

        self.transition(HandshakeState::KeyDerived(Session {
            peer_id: PeerId::from_verifying_key(&peer.signing_key),
            peer_signing_key: peer.signing_key,
            peer_transport_key: peer.transport_key,
            role: self.role,
            cipher,
        }));
        Ok(())
    }

    /// Take the derived session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the handshake is `KeyDerived`.
    pub fn into_session(self) -> Result<Session> {
        match self.state {
            HandshakeState::KeyDerived(session) => Ok(session),
            other => Err(Error::InvalidState(
                format!("handshake incomplete ({:?})", other.phase()).into(),
            )),
        }
    }

    /// Drive the handshake over `stream`.
    ///
    /// Every read and write is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Any I/O, framing, codec, authentication or crypto failure, or
    /// [`Error::Timeout`]. The caller owns the stream and must close it.
    pub async fn run<S>(
        mut self,
        stream: &mut S,
        max_frame_size: usize,
        timeout: Duration,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(own) = self.begin()? {
            bounded(timeout, write_message(stream, &own, max_frame_size)).await?;
        }

        let peer = bounded(timeout, read_message(stream, max_frame_size)).await?;

        if let Some(reply) = self.read_peer_message(peer)? {
            bounded(timeout, write_message(stream, &reply, max_frame_size)).await?;
        }

        self.derive()?;
        self.into_session()
    }

    fn own_message(&self, ephemeral: &EphemeralSecret) -> WireMessage {
        WireMessage::Handshake(build_handshake_message(
            self.identity,
            &ephemeral.public_key(),
        ))
    }

    fn take_state(&mut self) -> HandshakeState {
        std::mem::replace(&mut self.state, HandshakeState::Failed)
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::trace!(role = %self.role, phase = ?next.phase(), "handshake advanced");
        self.state = next;
    }
}

/// Build this node's handshake message for an ephemeral public key.
#[must_use]
pub fn build_handshake_message(
    identity: &Identity,
    transport_public_key: &x25519::PublicKey,
) -> HandshakeMessage {
    let transport = transport_public_key.to_bytes();
    HandshakeMessage {
        signing_public_key: identity.verifying_key().to_bytes().to_vec(),
        transport_public_key: transport.to_vec(),
        signature: identity.sign(&transport).as_bytes().to_vec(),
    }
}

fn verify_handshake_message(message: &HandshakeMessage) -> Result<VerifiedPeer> {
    let signing_key = VerifyingKey::from_slice(&message.signing_public_key)?;
    let transport_key = x25519::PublicKey::from_slice(&message.transport_public_key)?;

    let signature = Signature::from_slice(&message.signature)
        .map_err(|_| Error::AuthenticationFailed("malformed signature".into()))?;
    signing_key
        .verify(&message.transport_public_key, &signature)
        .map_err(|_| Error::AuthenticationFailed("signature does not match identity".into()))?;

    Ok(VerifiedPeer {
        signing_key,
        transport_key,
    })
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout("handshake".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;
    use crate::message::EncryptedPayload;
    use ivy_crypto::signatures::SigningKey;
    use tokio::io::duplex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn complete_pair(alice: &Identity, bob: &Identity) -> (Session, Session) {
        let mut initiator = Handshake::new(alice, Role::Initiator);
        let mut responder = Handshake::new(bob, Role::Responder);

        let m1 = initiator.begin().unwrap().unwrap();
        assert!(responder.begin().unwrap().is_none());
        assert_eq!(initiator.phase(), HandshakePhase::SentOwnMessage);
        assert_eq!(responder.phase(), HandshakePhase::AwaitPeerMessage);

        let m2 = responder.read_peer_message(m1).unwrap().unwrap();
        assert!(initiator.read_peer_message(m2).unwrap().is_none());
        assert_eq!(initiator.phase(), HandshakePhase::Verified);

        initiator.derive().unwrap();
        responder.derive().unwrap();
        assert_eq!(responder.phase(), HandshakePhase::KeyDerived);

        (
            initiator.into_session().unwrap(),
            responder.into_session().unwrap(),
        )
    }

    #[test]
    fn test_honest_handshake_derives_matching_ciphers() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let (a, b) = complete_pair(&alice, &bob);
        assert_eq!(a.peer_id(), &bob.peer_id());
        assert_eq!(b.peer_id(), &alice.peer_id());

        let mut a = a.into_cipher();
        let mut b = b.into_cipher();

        let ct = a.seal(b"hello").unwrap();
        assert_eq!(b.open(&ct).unwrap(), b"hello");
        let ct = b.seal(b"world").unwrap();
        assert_eq!(a.open(&ct).unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_run_over_stream() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let (mut left, mut right) = duplex(4096);

        let (a, b) = tokio::join!(
            Handshake::new(&alice, Role::Initiator).run(&mut left, DEFAULT_MAX_FRAME_SIZE, TIMEOUT),
            Handshake::new(&bob, Role::Responder).run(&mut right, DEFAULT_MAX_FRAME_SIZE, TIMEOUT),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.role(), Role::Initiator);
        assert_eq!(b.role(), Role::Responder);
        assert_eq!(a.peer_signing_key(), &bob.verifying_key());
    }

    #[test]
    fn test_ephemeral_keys_fresh_per_handshake() {
        let alice = Identity::generate();

        let mut first = Handshake::new(&alice, Role::Initiator);
        let mut second = Handshake::new(&alice, Role::Initiator);

        let (Some(WireMessage::Handshake(a)), Some(WireMessage::Handshake(b))) =
            (first.begin().unwrap(), second.begin().unwrap())
        else {
            panic!("initiator must produce a handshake message");
        };

        assert_eq!(a.signing_public_key, b.signing_public_key);
        assert_ne!(a.transport_public_key, b.transport_public_key);
    }

    #[test]
    fn test_forged_signature_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let mut initiator = Handshake::new(&alice, Role::Initiator);
        let Some(WireMessage::Handshake(mut forged)) = initiator.begin().unwrap() else {
            panic!("expected handshake");
        };
        forged.signature[0] ^= 0xFF;

        let mut responder = Handshake::new(&bob, Role::Responder);
        responder.begin().unwrap();
        let err = responder
            .read_peer_message(WireMessage::Handshake(forged))
            .unwrap_err();

        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert_eq!(responder.phase(), HandshakePhase::Failed);
        assert!(responder.into_session().is_err());
    }

    #[test]
    fn test_signature_over_wrong_bytes_rejected() {
        let mallory = Identity::generate();
        let bob = Identity::generate();
        let transport = EphemeralSecret::generate(&mut OsRng).public_key();

        // Signs its own identity key instead of the transport key
        let message = HandshakeMessage {
            signing_public_key: mallory.verifying_key().to_bytes().to_vec(),
            transport_public_key: transport.to_bytes().to_vec(),
            signature: mallory
                .sign(&mallory.verifying_key().to_bytes())
                .as_bytes()
                .to_vec(),
        };

        let mut responder = Handshake::new(&bob, Role::Responder);
        responder.begin().unwrap();
        assert!(matches!(
            responder.read_peer_message(WireMessage::Handshake(message)),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_claimed_identity_must_match_signer() {
        let mallory = Identity::generate();
        let victim = Identity::from_signing_key(SigningKey::from_bytes(&[4u8; 32]));
        let bob = Identity::generate();
        let transport = EphemeralSecret::generate(&mut OsRng).public_key();

        let mut message = build_handshake_message(&mallory, &transport);
        message.signing_public_key = victim.verifying_key().to_bytes().to_vec();

        let mut responder = Handshake::new(&bob, Role::Responder);
        responder.begin().unwrap();
        assert!(matches!(
            responder.read_peer_message(WireMessage::Handshake(message)),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_malformed_key_bytes_are_crypto_errors() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let transport = EphemeralSecret::generate(&mut OsRng).public_key();

        let mut message = build_handshake_message(&alice, &transport);
        message.transport_public_key.truncate(16);

        let mut responder = Handshake::new(&bob, Role::Responder);
        responder.begin().unwrap();
        assert!(matches!(
            responder.read_peer_message(WireMessage::Handshake(message)),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_encrypted_payload_during_handshake_rejected() {
        let bob = Identity::generate();
        let mut responder = Handshake::new(&bob, Role::Responder);
        responder.begin().unwrap();

        let stray = WireMessage::Encrypted(EncryptedPayload {
            ciphertext: vec![0; 32],
        });
        assert!(matches!(
            responder.read_peer_message(stray),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_steps_out_of_order_fail() {
        let alice = Identity::generate();

        let mut handshake = Handshake::new(&alice, Role::Initiator);
        assert!(matches!(handshake.derive(), Err(Error::InvalidState(_))));
        assert_eq!(handshake.phase(), HandshakePhase::Failed);

        let mut handshake = Handshake::new(&alice, Role::Initiator);
        handshake.begin().unwrap();
        assert!(handshake.begin().is_err());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let bob = Identity::generate();
        let (_left, mut right) = duplex(1024);

        let err = Handshake::new(&bob, Role::Responder)
            .run(&mut right, DEFAULT_MAX_FRAME_SIZE, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_peer_hangup_during_handshake() {
        let alice = Identity::generate();
        let (left, mut right) = duplex(1024);
        drop(left);

        let err = Handshake::new(&alice, Role::Responder)
            .run(&mut right, DEFAULT_MAX_FRAME_SIZE, TIMEOUT)
            .await
            .unwrap_err();

        assert!(err.is_end_of_stream());
    }
}
