//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Provides curve25519-based key exchange with:
//! - Low-order point rejection
//! - Automatic key clamping (RFC 7748)
//! - Zeroization of sensitive data

use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new random private key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer's public key is a low-order point.
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }

        Some(SharedSecret(shared))
    }

    /// Export as bytes.
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Parse a public key received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for anything but 32 bytes and
    /// [`CryptoError::InvalidPublicKey`] for the all-zero point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        if raw == [0u8; PUBLIC_KEY_SIZE] {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self::from_bytes(raw))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// Feed through a KDF before using it as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_x25519_key_exchange() {
        let alice_private = PrivateKey::generate(&mut OsRng);
        let alice_public = alice_private.public_key();

        let bob_private = PrivateKey::generate(&mut OsRng);
        let bob_public = bob_private.public_key();

        let alice_shared = alice_private.exchange(&bob_public).unwrap();
        let bob_shared = bob_private.exchange(&alice_public).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_reject_low_order_points() {
        let private = PrivateKey::generate(&mut OsRng);
        let zero_public = PublicKey::from_bytes([0u8; 32]);
        assert!(private.exchange(&zero_public).is_none());
    }

    #[test]
    fn test_key_serialization_roundtrip() {
        let original = PrivateKey::generate(&mut OsRng);
        let restored = PrivateKey::from_bytes(original.to_bytes());
        assert_eq!(
            original.public_key().to_bytes(),
            restored.public_key().to_bytes()
        );
    }

    #[test]
    fn test_public_key_from_slice() {
        let public = PrivateKey::generate(&mut OsRng).public_key();
        assert_eq!(PublicKey::from_slice(public.as_bytes()).unwrap(), public);
        assert!(matches!(
            PublicKey::from_slice(&[1u8; 31]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            PublicKey::from_slice(&[0u8; 32]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }
}
