//! Overlay addresses.
//!
//! An [`Address`] is a 256-bit identifier placing a node in the overlay. Nodes
//! derive it from their X25519 public key with BLAKE3, so an address is bound
//! to the key that decrypts messages sent to it.

use crate::pot::{Keyed, proximity_order};
use blake3::Hasher;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address length in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// Errors from parsing an address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input has the wrong number of bytes
    #[error("invalid address length: expected {ADDRESS_LENGTH}, got {0}")]
    InvalidLength(usize),

    /// Input is not valid hex
    #[error("invalid hex address: {0}")]
    InvalidHex(String),
}

/// 256-bit overlay address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Number of bits in an address.
    pub const BITS: usize = ADDRESS_LENGTH * 8;

    /// Generate a random address.
    ///
    /// Used for simulation and tests. Nodes should derive their address from
    /// their public key with [`Address::from_public_key`].
    ///
    /// # Examples
    ///
    /// ```
    /// use hive_discovery::Address;
    ///
    /// let addr = Address::random();
    /// assert_eq!(addr.as_bytes().len(), 32);
    /// ```
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Derive the overlay address of a 32-byte public key.
    ///
    /// # Examples
    ///
    /// ```
    /// use hive_discovery::Address;
    ///
    /// let a = Address::from_public_key(&[7u8; 32]);
    /// let b = Address::from_public_key(&[7u8; 32]);
    /// assert_eq!(a, b);
    /// ```
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(public_key);
        hasher.update(b"hive-overlay-address");
        Self(*hasher.finalize().as_bytes())
    }

    /// Create an address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create an address from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidLength`] unless `bytes` is exactly
    /// [`ADDRESS_LENGTH`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let arr: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parse a 64-character hex address, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidHex`] for malformed hex and
    /// [`AddressError::InvalidLength`] for the wrong number of bytes.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw bytes of the address.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Number of leading bits shared with `other` (256 when equal).
    ///
    /// # Examples
    ///
    /// ```
    /// use hive_discovery::Address;
    ///
    /// let a = Address::from_bytes([0u8; 32]);
    /// let mut b = [0u8; 32];
    /// b[0] = 0b0010_0000;
    /// assert_eq!(a.proximity(&Address::from_bytes(b)), 2);
    /// assert_eq!(a.proximity(&a), 256);
    /// ```
    #[must_use]
    pub fn proximity(&self, other: &Address) -> usize {
        proximity_order(&self.0, &other.0, 0).0
    }

    /// XOR distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Address) -> Address {
        let mut result = [0u8; ADDRESS_LENGTH];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Address(result)
    }

    /// Short hex label: the first 4 bytes.
    #[must_use]
    pub fn label(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Keyed for Address {
    fn key(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
