//! Encrypted message exchange after a completed handshake.
//!
//! [`SecureSession`] seals each application message with the session
//! cipher, wraps it in [`WireMessage::Encrypted`] and frames it. Receiving
//! reverses the steps. Any failure to open a payload is fatal: the cipher
//! counters are out of step afterwards and the session must be dropped.
//!
//! For concurrent use, [`SecureSession::split`] yields a [`SecureWriter`]
//! and a [`SecureReader`]; the reader can be turned into a [`ReadPump`]
//! task that publishes messages and its terminal error on two channels.

use std::time::Duration;

use ivy_crypto::session::{OpeningCipher, SealingCipher};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::handshake::Session;
use crate::identity::PeerId;
use crate::message::{self, EncryptedPayload, WireMessage, read_message, write_message};

/// Bidirectional encrypted session over one stream.
pub struct SecureSession<S> {
    stream: S,
    sealer: SealingCipher,
    opener: OpeningCipher,
    peer_id: PeerId,
    max_frame_size: usize,
}

impl<S> SecureSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` with the cipher derived by the handshake.
    #[must_use]
    pub fn new(stream: S, session: Session, max_frame_size: usize) -> Self {
        let peer_id = session.peer_id().clone();
        let (sealer, opener) = session.into_cipher().split();
        Self {
            stream,
            sealer,
            opener,
            peer_id,
            max_frame_size,
        }
    }

    /// Authenticated peer on the other end.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Seal and send one message.
    ///
    /// # Errors
    ///
    /// Codec, crypto, framing or I/O failure.
    pub async fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        seal_and_send(
            &mut self.stream,
            &mut self.sealer,
            message,
            self.max_frame_size,
        )
        .await
    }

    /// Receive and open one message.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the frame is not an encrypted payload
    /// - [`Error::Crypto`] if the payload fails to open
    /// - [`Error::Closed`] on clean end-of-stream
    pub async fn receive<M: DeserializeOwned>(&mut self) -> Result<M> {
        receive_and_open(&mut self.stream, &mut self.opener, self.max_frame_size).await
    }

    /// Split into independently owned reader and writer halves.
    #[must_use]
    pub fn split(self) -> (SecureReader<ReadHalf<S>>, SecureWriter<WriteHalf<S>>) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            SecureReader {
                reader,
                opener: self.opener,
                peer_id: self.peer_id.clone(),
                max_frame_size: self.max_frame_size,
            },
            SecureWriter {
                writer,
                sealer: self.sealer,
                max_frame_size: self.max_frame_size,
            },
        )
    }
}

/// Sending half of a split session.
pub struct SecureWriter<W> {
    writer: W,
    sealer: SealingCipher,
    max_frame_size: usize,
}

impl<W> SecureWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Seal and send one message.
    ///
    /// # Errors
    ///
    /// Codec, crypto, framing or I/O failure.
    pub async fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        seal_and_send(
            &mut self.writer,
            &mut self.sealer,
            message,
            self.max_frame_size,
        )
        .await
    }

    /// Close the write side so the peer observes end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Messages sent so far.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.sealer.counter()
    }
}

/// Receiving half of a split session.
pub struct SecureReader<R> {
    reader: R,
    opener: OpeningCipher,
    peer_id: PeerId,
    max_frame_size: usize,
}

impl<R> SecureReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Receive and open one message.
    ///
    /// # Errors
    ///
    /// See [`SecureSession::receive`].
    pub async fn receive<M: DeserializeOwned>(&mut self) -> Result<M> {
        receive_and_open(&mut self.reader, &mut self.opener, self.max_frame_size).await
    }

    /// Move the reader into a background task.
    ///
    /// Each receive is bounded by `idle_timeout` when one is given.
    pub fn spawn_pump<M>(self, capacity: usize, idle_timeout: Option<Duration>) -> ReadPump<M>
    where
        R: Send + 'static,
        M: DeserializeOwned + Send + 'static,
    {
        let (message_tx, messages) = mpsc::channel(capacity.max(1));
        let (error_tx, error) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut reader = self;
            let err = loop {
                let next = match idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, reader.receive::<M>())
                        .await
                        .unwrap_or_else(|_| Err(Error::Timeout("idle session".into()))),
                    None => reader.receive::<M>().await,
                };

                match next {
                    Ok(message) => {
                        if message_tx.send(message).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => break e,
                }
            };

            tracing::trace!(peer = %reader.peer_id, error = %err, "read pump stopped");
            let _ = error_tx.send(err);
        });

        ReadPump {
            messages,
            error: Some(error),
            task,
        }
    }
}

/// Background reader publishing decoded messages and a terminal error.
///
/// Dropping the pump stops its task.
pub struct ReadPump<M> {
    messages: mpsc::Receiver<M>,
    error: Option<oneshot::Receiver<Error>>,
    task: JoinHandle<()>,
}

impl<M> ReadPump<M> {
    /// Next message, or the error that stopped the pump.
    ///
    /// Messages received before the error are always delivered first.
    /// Cancel-safe.
    ///
    /// # Errors
    ///
    /// The pump's terminal error; [`Error::Closed`] on every later call.
    pub async fn recv(&mut self) -> Result<M> {
        if let Some(message) = self.messages.recv().await {
            return Ok(message);
        }

        match self.error.as_mut() {
            Some(rx) => {
                let err = rx.await.unwrap_or(Error::Closed);
                self.error = None;
                Err(err)
            }
            None => Err(Error::Closed),
        }
    }
}

impl<M> Drop for ReadPump<M> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn seal_and_send<W, M>(
    writer: &mut W,
    sealer: &mut SealingCipher,
    message: &M,
    max_frame_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let plaintext = message::encode(message)?;
    let ciphertext = sealer.seal(&plaintext)?;
    let wire = WireMessage::Encrypted(EncryptedPayload { ciphertext });
    write_message(writer, &wire, max_frame_size).await
}

async fn receive_and_open<R, M>(
    reader: &mut R,
    opener: &mut OpeningCipher,
    max_frame_size: usize,
) -> Result<M>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    match read_message(reader, max_frame_size).await? {
        WireMessage::Encrypted(payload) => {
            let plaintext = opener.open(&payload.ciphertext)?;
            message::decode(&plaintext, max_frame_size)
        }
        other => Err(Error::Protocol(
            format!("unexpected {} after handshake", other.message_type()).into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;
    use crate::handshake::{Handshake, Role, build_handshake_message};
    use crate::identity::Identity;
    use crate::message::PeerMessage;
    use ivy_crypto::x25519::EphemeralSecret;
    use rand_core::OsRng;
    use tokio::io::{DuplexStream, duplex};

    fn sessions(alice: &Identity, bob: &Identity) -> (Session, Session) {
        let mut initiator = Handshake::new(alice, Role::Initiator);
        let mut responder = Handshake::new(bob, Role::Responder);

        let m1 = initiator.begin().unwrap().unwrap();
        responder.begin().unwrap();
        let m2 = responder.read_peer_message(m1).unwrap().unwrap();
        initiator.read_peer_message(m2).unwrap();
        initiator.derive().unwrap();
        responder.derive().unwrap();

        (
            initiator.into_session().unwrap(),
            responder.into_session().unwrap(),
        )
    }

    fn connected() -> (SecureSession<DuplexStream>, SecureSession<DuplexStream>) {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let (a, b) = sessions(&alice, &bob);
        let (left, right) = duplex(64 * 1024);
        (
            SecureSession::new(left, a, DEFAULT_MAX_FRAME_SIZE),
            SecureSession::new(right, b, DEFAULT_MAX_FRAME_SIZE),
        )
    }

    #[tokio::test]
    async fn test_hello_world_exchange() {
        let (mut alice, mut bob) = connected();

        alice
            .send(&PeerMessage::Text("hello".into()))
            .await
            .unwrap();
        let got: PeerMessage = bob.receive().await.unwrap();
        assert_eq!(got, PeerMessage::Text("hello".into()));

        bob.send(&PeerMessage::Text("world".into())).await.unwrap();
        let got: PeerMessage = alice.receive().await.unwrap();
        assert_eq!(got, PeerMessage::Text("world".into()));
    }

    #[tokio::test]
    async fn test_many_messages_in_order() {
        let (mut alice, mut bob) = connected();

        for i in 0..50u64 {
            alice.send(&PeerMessage::Ping(i)).await.unwrap();
        }
        for i in 0..50u64 {
            assert_eq!(bob.receive::<PeerMessage>().await.unwrap(), PeerMessage::Ping(i));
        }
    }

    #[tokio::test]
    async fn test_handshake_after_setup_is_protocol_error() {
        let (mut alice, mut bob) = connected();
        let mallory = Identity::generate();
        let stray = WireMessage::Handshake(build_handshake_message(
            &mallory,
            &EphemeralSecret::generate(&mut OsRng).public_key(),
        ));

        write_message(&mut alice.stream, &stray, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        assert!(matches!(
            bob.receive::<PeerMessage>().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_crypto_error() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let (a, b) = sessions(&alice, &bob);

        let (left, mut tap) = duplex(4096);
        let (mut inject, right) = duplex(4096);
        let mut alice = SecureSession::new(left, a, DEFAULT_MAX_FRAME_SIZE);
        let mut bob = SecureSession::new(right, b, DEFAULT_MAX_FRAME_SIZE);

        alice
            .send(&PeerMessage::Text("integrity".into()))
            .await
            .unwrap();

        let WireMessage::Encrypted(mut payload) =
            read_message(&mut tap, DEFAULT_MAX_FRAME_SIZE).await.unwrap()
        else {
            panic!("expected encrypted payload");
        };
        payload.ciphertext[3] ^= 0x10;
        write_message(
            &mut inject,
            &WireMessage::Encrypted(payload),
            DEFAULT_MAX_FRAME_SIZE,
        )
        .await
        .unwrap();

        assert!(matches!(
            bob.receive::<PeerMessage>().await,
            Err(Error::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (alice, bob) = connected();
        let (_alice_rx, mut alice_tx) = alice.split();
        let (mut bob_rx, _bob_tx) = bob.split();

        alice_tx.send(&PeerMessage::Pong(9)).await.unwrap();
        assert_eq!(alice_tx.messages_sent(), 1);
        assert_eq!(
            bob_rx.receive::<PeerMessage>().await.unwrap(),
            PeerMessage::Pong(9)
        );
    }

    #[tokio::test]
    async fn test_pump_drains_then_reports_end_of_stream() {
        let (alice, bob) = connected();
        let (_alice_rx, mut alice_tx) = alice.split();
        let (bob_rx, _bob_tx) = bob.split();
        let mut pump = bob_rx.spawn_pump::<PeerMessage>(8, None);

        alice_tx
            .send(&PeerMessage::Text("one".into()))
            .await
            .unwrap();
        alice_tx
            .send(&PeerMessage::Text("two".into()))
            .await
            .unwrap();
        alice_tx.shutdown().await.unwrap();

        assert_eq!(pump.recv().await.unwrap(), PeerMessage::Text("one".into()));
        assert_eq!(pump.recv().await.unwrap(), PeerMessage::Text("two".into()));

        let err = pump.recv().await.unwrap_err();
        assert!(err.is_end_of_stream());

        // Later calls keep reporting a closed pump
        assert!(pump.recv().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_pump_idle_timeout() {
        let (_alice, bob) = connected();
        let (bob_rx, _bob_tx) = bob.split();
        let mut pump = bob_rx.spawn_pump::<PeerMessage>(8, Some(Duration::from_millis(50)));

        assert!(matches!(pump.recv().await, Err(Error::Timeout(_))));
    }
}
