//! Error types for the router.
//!
//! # Error Categories
//!
//! - **Transient**: forwarding found no reachable peer or the outbox is full;
//!   retrying later may succeed
//! - **Permanent**: malformed input, missing keys, disallowed operations

use crate::error::{MessageError, OutboxError};
use hive_discovery::CapabilityError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in router operations
#[derive(Debug, Error)]
pub enum RouterError {
    // ============ Input Errors ============
    /// Envelope construction or decoding failed
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Raw messages are disabled by the router params
    #[error("raw messages not allowed")]
    RawNotAllowed,

    /// Invalid router params
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    // ============ Key Errors ============
    /// No key stored under this id
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// The key has no peer bound for this topic
    #[error("key {key_id} has no peer for topic {topic}")]
    UnboundTopic {
        /// Key id
        key_id: String,
        /// Topic, rendered as hex
        topic: String,
    },

    /// Sealing or opening an envelope failed
    #[error("crypto error: {0}")]
    Crypto(#[from] hive_crypto::CryptoError),

    /// No stored key opened the envelope
    #[error("decryption failed")]
    DecryptionFailed,

    // ============ Routing Errors ============
    /// Forwarding reached no peer
    #[error("unable to forward to any peers")]
    NoPeers,

    /// Envelope could not be queued
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Advertising the router capability failed
    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// The router has been dropped or stopped
    #[error("router stopped")]
    Stopped,
}

impl RouterError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RouterError::NoPeers | RouterError::Outbox(OutboxError::Full(_))
        )
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        RouterError::InvalidConfig(Cow::Borrowed(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RouterError::NoPeers.is_transient());
        assert!(RouterError::Outbox(OutboxError::Full(50)).is_transient());
        assert!(!RouterError::Outbox(OutboxError::Stopped).is_transient());
        assert!(!RouterError::RawNotAllowed.is_transient());
        assert!(!RouterError::DecryptionFailed.is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RouterError::invalid_config("zero ttl").to_string(),
            "invalid configuration: zero ttl"
        );
        let err: RouterError = MessageError::AddressTooLong(40).into();
        assert_eq!(
            err.to_string(),
            "message error: destination address too long: 40 bytes, at most 32"
        );
    }
}
