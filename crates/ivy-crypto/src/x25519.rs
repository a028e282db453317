//! Ephemeral X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! A fresh [`EphemeralSecret`] is generated for every connection attempt.
//! [`EphemeralSecret::exchange`] consumes the secret, so a transport key
//! can take part in exactly one exchange and can never be reused or
//! persisted.
//!
//! - Low-order point rejection
//! - Automatic key clamping (RFC 7748)
//! - Zeroization of sensitive data

use crate::{CryptoError, X25519_PUBLIC_KEY_SIZE};
use rand_core::{CryptoRng, RngCore};

/// Single-use X25519 private key.
pub struct EphemeralSecret(x25519_dalek::EphemeralSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes), zeroized on drop.
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl EphemeralSecret {
    /// Generate a new random ephemeral secret.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::EphemeralSecret::random_from_rng(rng))
    }

    /// Derive the public key from this secret.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform the Diffie-Hellman exchange, consuming the secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::WeakSharedSecret`] if the peer's public key is a
    /// low-order point and the result is all zeros.
    pub fn exchange(self, peer_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::WeakSharedSecret);
        }

        Ok(SharedSecret(shared))
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; X25519_PUBLIC_KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Import a public key received off the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; X25519_PUBLIC_KEY_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: X25519_PUBLIC_KEY_SIZE,
                actual: slice.len(),
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; X25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// Feed this through [`crate::hash::Kdf`] before using it as a cipher key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}
