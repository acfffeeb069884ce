//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Sealed envelope too short or otherwise malformed
    #[error("invalid sealed envelope: {0}")]
    InvalidEnvelope(String),

    /// Invalid public key (low-order point or wrong encoding)
    #[error("invalid public key")]
    InvalidPublicKey,

    /// No key stored under the given identifier
    #[error("unknown key id: {0}")]
    UnknownKey(String),
}
