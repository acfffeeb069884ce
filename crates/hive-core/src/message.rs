//! Envelopes: the unit the router handles, forwards and delivers.
//!
//! # Wire Format
//!
//! Envelopes travel as bincode-encoded structs:
//!
//! ```text
//! to (0..=32 bytes) | flags (u8) | expire (u32, unix seconds) | topic (4 bytes) | payload
//! ```
//!
//! A destination shorter than a full address matches every node whose address
//! starts with it. An empty destination matches every node.
//!
//! The digest used for replay suppression is computed locally over every
//! transmitted field and never sent.

use crate::error::MessageError;
use hive_discovery::ADDRESS_LENGTH;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size of a topic identifier in bytes.
pub const TOPIC_LENGTH: usize = 4;

/// Envelope digest.
pub type Digest = [u8; 32];

/// Four-byte topic identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic([u8; TOPIC_LENGTH]);

impl Topic {
    /// Topic from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; TOPIC_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Topic derived from a name: the first four bytes of its BLAKE3 hash.
    ///
    /// ```
    /// use hive_core::Topic;
    ///
    /// assert_eq!(Topic::from_name("chat"), Topic::from_name("chat"));
    /// assert_ne!(Topic::from_name("chat"), Topic::from_name("mail"));
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; TOPIC_LENGTH];
        bytes.copy_from_slice(&hash.as_bytes()[..TOPIC_LENGTH]);
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TOPIC_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", hex::encode(self.0))
    }
}

/// Envelope flags bitmap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags(u8);

impl Flags {
    /// Payload is not sealed by the router
    pub const RAW: u8 = 0b0000_0001;
    /// Payload is sealed under a symmetric key
    pub const SYMMETRIC: u8 = 0b0000_0010;

    /// Flags for a raw envelope.
    #[must_use]
    pub const fn raw() -> Self {
        Self(Self::RAW)
    }

    /// Flags for a symmetrically sealed envelope.
    #[must_use]
    pub const fn symmetric() -> Self {
        Self(Self::SYMMETRIC)
    }

    /// Flags for an asymmetrically sealed envelope.
    #[must_use]
    pub const fn asymmetric() -> Self {
        Self(0)
    }

    /// Create from the wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check the raw flag.
    #[must_use]
    pub const fn is_raw(self) -> bool {
        self.0 & Self::RAW != 0
    }

    /// Check the symmetric flag.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        self.0 & Self::SYMMETRIC != 0
    }
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    to: Vec<u8>,
    flags: Flags,
    expire: u32,
    topic: Topic,
    payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::AddressTooLong`] if `to` is longer than an
    /// overlay address.
    pub fn new(
        to: Vec<u8>,
        topic: Topic,
        flags: Flags,
        expire: u32,
        payload: Vec<u8>,
    ) -> Result<Self, MessageError> {
        validate_address(&to)?;
        Ok(Self {
            to,
            flags,
            expire,
            topic,
            payload,
        })
    }

    /// Destination prefix.
    #[must_use]
    pub fn to(&self) -> &[u8] {
        &self.to
    }

    /// Flags.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Expiry as unix seconds.
    #[must_use]
    pub fn expire(&self) -> u32 {
        self.expire
    }

    /// Topic.
    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Payload, sealed unless the raw flag is set.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the destination is shorter than a full address.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.to.len() < ADDRESS_LENGTH
    }

    /// Whether the envelope expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        u64::from(self.expire) < unix_seconds(now)
    }

    /// Whether the envelope has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// BLAKE3 digest over every transmitted field.
    #[must_use]
    pub fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        // length-prefixed so a destination byte never shifts into the flags
        hasher.update(&[self.to.len() as u8]);
        hasher.update(&self.to);
        hasher.update(&[self.flags.as_byte()]);
        hasher.update(&self.expire.to_be_bytes());
        hasher.update(self.topic.as_bytes());
        hasher.update(&self.payload);
        *hasher.finalize().as_bytes()
    }

    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Encode(e.to_string()))
    }

    /// Decode from the wire, rejecting input over `max_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::TooLarge`], [`MessageError::Decode`] or
    /// [`MessageError::AddressTooLong`].
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<Self, MessageError> {
        if bytes.len() > max_size {
            return Err(MessageError::TooLarge {
                size: bytes.len(),
                max: max_size,
            });
        }
        let envelope: Self =
            bincode::deserialize(bytes).map_err(|e| MessageError::Decode(e.to_string()))?;
        validate_address(&envelope.to)?;
        Ok(envelope)
    }
}

/// Reject destinations longer than an overlay address.
///
/// # Errors
///
/// Returns [`MessageError::AddressTooLong`].
pub fn validate_address(to: &[u8]) -> Result<(), MessageError> {
    if to.len() > ADDRESS_LENGTH {
        return Err(MessageError::AddressTooLong(to.len()));
    }
    Ok(())
}

/// Expiry timestamp `ttl` from now.
#[must_use]
pub fn expiry_after(ttl: Duration) -> u32 {
    let at = unix_seconds(SystemTime::now()).saturating_add(ttl.as_secs());
    u32::try_from(at).unwrap_or(u32::MAX)
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(to: &[u8], payload: &[u8]) -> Envelope {
        Envelope::new(
            to.to_vec(),
            Topic::from_name("test"),
            Flags::raw(),
            expiry_after(Duration::from_secs(60)),
            payload.to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_flags() {
        assert!(Flags::raw().is_raw());
        assert!(!Flags::raw().is_symmetric());
        assert!(Flags::symmetric().is_symmetric());
        let asym = Flags::asymmetric();
        assert!(!asym.is_raw() && !asym.is_symmetric());
        assert_eq!(Flags::from_byte(0b11).as_byte(), 0b11);
    }

    #[test]
    fn test_topic_display() {
        let topic = Topic::new([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(topic.to_string(), "0xdeadbeef");
    }

    #[test]
    fn test_address_too_long() {
        let err = Envelope::new(vec![0; 33], Topic::default(), Flags::raw(), 0, vec![]).unwrap_err();
        assert_eq!(err, MessageError::AddressTooLong(33));
        assert!(validate_address(&[0; 32]).is_ok());
        assert!(validate_address(&[]).is_ok());
    }

    #[test]
    fn test_partial() {
        assert!(envelope(&[1, 2], b"x").is_partial());
        assert!(envelope(&[], b"x").is_partial());
        assert!(!envelope(&[7; 32], b"x").is_partial());
    }

    #[test]
    fn test_expiry() {
        let env = envelope(&[1], b"x");
        assert!(!env.is_expired());
        let later = SystemTime::now() + Duration::from_secs(120);
        assert!(env.is_expired_at(later));

        let stale = Envelope::new(vec![], Topic::default(), Flags::raw(), 1, vec![]).unwrap();
        assert!(stale.is_expired());
    }

    #[test]
    fn test_digest_covers_fields() {
        let a = envelope(&[1, 2], b"payload");
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), envelope(&[1, 3], b"payload").digest());
        assert_ne!(a.digest(), envelope(&[1, 2], b"payloaD").digest());
        // the destination length is part of the digest
        assert_ne!(envelope(&[1], &[2]).digest(), envelope(&[1, 2], &[]).digest());
    }

    #[test]
    fn test_wire_roundtrip() {
        let env = envelope(&[0xab; 5], b"hello");
        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes, 1024).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.digest(), env.digest());
    }

    #[test]
    fn test_from_bytes_rejects() {
        let env = envelope(&[0xab; 5], &[0u8; 100]);
        let bytes = env.to_bytes().unwrap();
        assert!(matches!(
            Envelope::from_bytes(&bytes, 50),
            Err(MessageError::TooLarge { max: 50, .. })
        ));
        assert!(matches!(
            Envelope::from_bytes(&[1, 2, 3], 1024),
            Err(MessageError::Decode(_))
        ));

        // bypass the constructor to put an oversized destination on the wire
        let oversized = Envelope {
            to: vec![0; 40],
            ..env
        };
        let bytes = oversized.to_bytes().unwrap();
        assert_eq!(
            Envelope::from_bytes(&bytes, 1024),
            Err(MessageError::AddressTooLong(40))
        );
    }
}
