//! Session encryption state for post-handshake communication.
//!
//! Both peers derive the same session key from the X25519 shared secret.
//! Each direction of a connection uses its own nonce salt and its own
//! strictly increasing message counter, so no (key, nonce) pair is ever
//! used twice:
//!
//! ```text
//! nonce = counter (8 bytes, LE) || direction salt (16 bytes)
//! ```
//!
//! The receiver expects counters in order. A dropped, replayed, or
//! reordered message fails authentication, which the caller must treat as
//! fatal for the session.

use crate::aead::{AeadKey, NONCE_SALT_SIZE, Nonce};
use crate::hash::Kdf;
use crate::x25519::SharedSecret;
use crate::CryptoError;

const SESSION_KEY_CONTEXT: &str = "ivy session key v1";

/// Direction of traffic on a connection, named by handshake role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages sent by the dialing side
    InitiatorToResponder,
    /// Messages sent by the accepting side
    ResponderToInitiator,
}

impl Direction {
    /// The opposite direction.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Direction::InitiatorToResponder => Direction::ResponderToInitiator,
            Direction::ResponderToInitiator => Direction::InitiatorToResponder,
        }
    }

    fn salt(self) -> [u8; NONCE_SALT_SIZE] {
        match self {
            Direction::InitiatorToResponder => [0x01; NONCE_SALT_SIZE],
            Direction::ResponderToInitiator => [0x02; NONCE_SALT_SIZE],
        }
    }
}

/// Sealing half of a session: encrypts outgoing messages.
pub struct SealingCipher {
    key: AeadKey,
    salt: [u8; NONCE_SALT_SIZE],
    counter: u64,
}

impl SealingCipher {
    /// Encrypt one message under the next counter nonce.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceOverflow` if the counter is exhausted.
    /// Returns `CryptoError::EncryptionFailed` on AEAD encryption failure.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let next = self.counter.checked_add(1).ok_or(CryptoError::NonceOverflow)?;
        let nonce = Nonce::from_counter(self.counter, &self.salt);
        let ciphertext = self.key.encrypt(&nonce, plaintext, &[])?;
        self.counter = next;
        Ok(ciphertext)
    }

    /// Number of messages sealed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Opening half of a session: decrypts incoming messages.
pub struct OpeningCipher {
    key: AeadKey,
    salt: [u8; NONCE_SALT_SIZE],
    counter: u64,
}

impl OpeningCipher {
    /// Decrypt the next message in sequence.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceOverflow` if the counter is exhausted.
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let next = self.counter.checked_add(1).ok_or(CryptoError::NonceOverflow)?;
        let nonce = Nonce::from_counter(self.counter, &self.salt);
        let plaintext = self.key.decrypt(&nonce, ciphertext, &[])?;
        self.counter = next;
        Ok(plaintext)
    }

    /// Number of messages opened so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Bidirectional session cipher.
pub struct SessionCipher {
    sealer: SealingCipher,
    opener: OpeningCipher,
}

impl SessionCipher {
    /// Build the session cipher from a Diffie-Hellman shared secret.
    ///
    /// `outbound` is the direction this side sends in.
    #[must_use]
    pub fn from_shared_secret(shared: &SharedSecret, outbound: Direction) -> Self {
        let key = Kdf::new(SESSION_KEY_CONTEXT).derive_key(shared.as_bytes());
        Self::from_key(key, outbound)
    }

    /// Build the session cipher from an already derived key.
    #[must_use]
    pub fn from_key(key: [u8; 32], outbound: Direction) -> Self {
        let key = AeadKey::new(key);
        Self {
            sealer: SealingCipher {
                key: key.clone(),
                salt: outbound.salt(),
                counter: 0,
            },
            opener: OpeningCipher {
                key,
                salt: outbound.reverse().salt(),
                counter: 0,
            },
        }
    }

    /// Encrypt an outgoing message.
    ///
    /// # Errors
    ///
    /// See [`SealingCipher::seal`].
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.sealer.seal(plaintext)
    }

    /// Decrypt an incoming message.
    ///
    /// # Errors
    ///
    /// See [`OpeningCipher::open`].
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.opener.open(ciphertext)
    }

    /// Split into independently owned halves for concurrent read/write tasks.
    #[must_use]
    pub fn split(self) -> (SealingCipher, OpeningCipher) {
        (self.sealer, self.opener)
    }
}
