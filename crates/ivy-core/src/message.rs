//! Wire messages and their binary encoding.
//!
//! Every frame on the wire carries exactly one [`WireMessage`]: either a
//! [`HandshakeMessage`] during connection setup or an
//! [`EncryptedPayload`] afterwards. The inner application message
//! ([`PeerMessage`]) is only visible after the session cipher opens the
//! payload.
//!
//! Messages are encoded as CBOR maps keyed by field name. An enum is a
//! one-entry map from variant name to its body, so a payload names the
//! variant it carries and decodes to exactly one message or fails. Byte
//! fields are CBOR byte strings. Decoding is bounded by the frame limit
//! and rejects trailing bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};

/// Handshake message: identity key, ephemeral key and the binding signature.
///
/// `signature = Sign(identity key, transport_public_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Raw Ed25519 verifying key bytes
    #[serde(with = "serde_bytes")]
    pub signing_public_key: Vec<u8>,
    /// Raw X25519 ephemeral public key bytes
    #[serde(with = "serde_bytes")]
    pub transport_public_key: Vec<u8>,
    /// Ed25519 signature over `transport_public_key`
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Sealed application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// AEAD ciphertext with appended tag
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Top-level message carried in every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Connection setup
    Handshake(HandshakeMessage),
    /// Post-handshake traffic
    Encrypted(EncryptedPayload),
}

impl WireMessage {
    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Deserialize from bytes, reading at most `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] if the bytes are malformed, name no
    /// known variant or more than one, exceed `limit`, or have trailing data.
    pub fn decode(bytes: &[u8], limit: usize) -> Result<Self> {
        decode(bytes, limit)
    }

    /// Variant name for logging.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            WireMessage::Handshake(_) => "Handshake",
            WireMessage::Encrypted(_) => "Encrypted",
        }
    }
}

/// Application messages exchanged inside a secure session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Text payload delivered to the application
    Text(String),
    /// Keepalive request
    Ping(u64),
    /// Keepalive reply echoing the request value
    Pong(u64),
}

impl PeerMessage {
    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Deserialize from bytes, reading at most `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] on malformed input.
    pub fn decode(bytes: &[u8], limit: usize) -> Result<Self> {
        decode(bytes, limit)
    }
}

/// Encode any serializable value as CBOR.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| Error::Codec(format!("encode failed: {e}").into()))?;
    Ok(buf)
}

/// Decode exactly one CBOR value occupying all of `bytes`.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8], limit: usize) -> Result<T> {
    if bytes.len() > limit {
        return Err(Error::Codec(
            format!("{} bytes exceeds decode limit of {limit}", bytes.len()).into(),
        ));
    }

    let mut reader = bytes;
    let value = ciborium::from_reader(&mut reader)
        .map_err(|e| Error::Codec(format!("decode failed: {e}").into()))?;

    if !reader.is_empty() {
        return Err(Error::Codec(
            format!("{} trailing bytes after message", reader.len()).into(),
        ));
    }
    Ok(value)
}

/// Read one framed wire message.
///
/// # Errors
///
/// Propagates framing and codec errors.
pub async fn read_message<R>(reader: &mut R, max_frame_size: usize) -> Result<WireMessage>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, max_frame_size).await?;
    WireMessage::decode(&payload, max_frame_size)
}

/// Encode and write one framed wire message.
///
/// # Errors
///
/// Propagates codec and framing errors.
pub async fn write_message<W>(
    writer: &mut W,
    message: &WireMessage,
    max_frame_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = message.encode()?;
    write_frame(writer, &payload, max_frame_size).await
}
