//! BLAKE3 key derivation.

/// BLAKE3 key derivation with a fixed context string.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kdf = Kdf::new("hive envelope v1 asymmetric");
    /// let key = kdf.derive_key(&shared_secret);
    /// ```
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive a 32-byte key from the concatenation of all input parts.
    #[must_use]
    pub fn derive_key_from(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key(self.context);
        for part in parts {
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        self.derive_key_from(&[ikm])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_context_separation() {
        let a = Kdf::new("context a").derive_key(b"secret");
        let b = Kdf::new("context b").derive_key(b"secret");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kdf_parts_concatenate() {
        let kdf = Kdf::new("parts");
        assert_eq!(kdf.derive_key_from(&[&b"ab"[..], &b"cd"[..]]), kdf.derive_key(b"abcd"));
    }
}
