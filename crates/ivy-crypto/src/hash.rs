//! BLAKE3 hashing and key derivation.

/// BLAKE3 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// Compute BLAKE3 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 Key Derivation Function with context.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kdf = Kdf::new("ivy session key v1");
    /// let key = kdf.derive_key(shared_secret.as_bytes());
    /// ```
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive output from input key material.
    pub fn derive(&self, ikm: &[u8], output: &mut [u8]) {
        let key_hash = hash(ikm);
        let mut hasher = blake3::Hasher::new_keyed(&key_hash);
        hasher.update(self.context.as_bytes());

        let mut reader = hasher.finalize_xof();
        reader.fill(output);
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        let mut output = [0u8; 32];
        self.derive(ikm, &mut output);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"ivy"), hash(b"ivy"));
        assert_ne!(hash(b"ivy"), hash(b"ivz"));
    }

    #[test]
    fn test_kdf_context_separation() {
        let ikm = [7u8; 32];
        let a = Kdf::new("context a").derive_key(&ikm);
        let b = Kdf::new("context b").derive_key(&ikm);

        assert_ne!(a, b);
        assert_eq!(a, Kdf::new("context a").derive_key(&ikm));
    }

    #[test]
    fn test_kdf_variable_output() {
        let kdf = Kdf::new("xof");
        let mut short = [0u8; 16];
        let mut long = [0u8; 64];
        kdf.derive(b"ikm", &mut short);
        kdf.derive(b"ikm", &mut long);

        // XOF output is a prefix-stable stream
        assert_eq!(short, long[..16]);
    }
}
