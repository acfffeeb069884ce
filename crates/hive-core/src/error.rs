//! Error types for envelopes and the outbox.

use thiserror::Error;

/// Envelope construction and wire errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Destination longer than a full overlay address
    #[error("destination address too long: {0} bytes, at most {max}", max = hive_discovery::ADDRESS_LENGTH)]
    AddressTooLong(usize),

    /// Encoded envelope exceeds the maximum message size
    #[error("message too large: {size} bytes, at most {max}")]
    TooLarge {
        /// Encoded size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Wire bytes did not decode to an envelope
    #[error("malformed envelope: {0}")]
    Decode(String),

    /// Envelope could not be encoded
    #[error("envelope encoding failed: {0}")]
    Encode(String),
}

/// Outbox errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OutboxError {
    /// Every slot holds a pending envelope
    #[error("outbox full: {0} envelopes pending")]
    Full(usize),

    /// The outbox worker has been stopped
    #[error("outbox stopped")]
    Stopped,
}
