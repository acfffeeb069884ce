//! # Hive Crypto
//!
//! Cryptographic primitives used to seal Hive envelopes.
//!
//! This crate provides:
//! - `XChaCha20-Poly1305` AEAD encryption
//! - X25519 key agreement with low-order point rejection
//! - BLAKE3 context-separated key derivation
//! - Symmetric and asymmetric envelope sealing ([`seal`])
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | KDF | BLAKE3 derive-key | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod seal;
pub mod x25519;

pub use error::CryptoError;
pub use seal::{Unwrapped, WrapMode, WrapParams, unwrap_asymmetric, unwrap_symmetric, wrap};
