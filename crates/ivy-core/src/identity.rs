//! Node identity and peer identifiers.
//!
//! A node is identified by a long-term Ed25519 keypair. Its [`PeerId`] is
//! the standard base64 encoding of the raw 32-byte verifying key, which
//! makes the ID a pure function of the public key.
//!
//! Identities live for the lifetime of the process only; nothing is
//! written to disk.
//!
//! # Example
//!
//! ```
//! use ivy_core::identity::{Identity, PeerId};
//!
//! let identity = Identity::generate();
//! let again = PeerId::from_verifying_key(&identity.verifying_key());
//! assert_eq!(identity.peer_id(), again);
//! ```

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ivy_crypto::ED25519_PUBLIC_KEY_SIZE;
use ivy_crypto::signatures::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable peer identifier: standard base64 of the Ed25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the peer ID for a verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self::from_public_key_bytes(&key.to_bytes())
    }

    /// Derive the peer ID for raw public-key bytes.
    #[must_use]
    pub fn from_public_key_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Parse a peer ID received from outside the handshake (e.g. discovery).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerId`] if the string is not standard
    /// base64 of a valid Ed25519 public key.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|_| Error::InvalidPeerId(s.to_string()))?;
        let key = VerifyingKey::from_slice(&bytes).map_err(|_| Error::InvalidPeerId(s.to_string()))?;
        Ok(Self::from_verifying_key(&key))
    }

    /// The encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Long-term node identity.
///
/// Holds the Ed25519 signing key; the key is zeroized when the identity
/// is dropped.
pub struct Identity {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl Identity {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        use rand_core::OsRng;

        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Build an identity around an existing signing key.
    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let peer_id = PeerId::from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            peer_id,
        }
    }

    /// This node's peer ID.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    /// The public half of the identity keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign `message` with the long-term key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}
