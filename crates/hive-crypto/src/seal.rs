//! Envelope sealing.
//!
//! Wraps a payload either under a shared symmetric key or to a recipient's
//! X25519 public key. Both modes carry the sender's static public key so the
//! receiver can attribute the message.
//!
//! # Wire Layout
//!
//! ```text
//! symmetric:   nonce(24) | AEAD_k(sender_pub(32) | payload)
//!
//! asymmetric:  ephemeral_pub(32) | nonce(24)
//!              | AEAD_k1(sender_pub(32))            k1 = KDF(DH(e, R))
//!              | AEAD_k2(payload)                   k2 = KDF(k1, DH(s, R))
//! ```
//!
//! The asymmetric layout follows the one-way Noise `X` pattern: the static key
//! is revealed only to the recipient, and mixing `DH(s, R)` into `k2`
//! authenticates it. The caller supplies associated data (typically the
//! envelope topic) that both modes bind.

use crate::CryptoError;
use crate::aead::{AeadKey, NONCE_SIZE, Nonce, TAG_SIZE};
use crate::hash::Kdf;
use crate::x25519::{PUBLIC_KEY_SIZE, PrivateKey, PublicKey};
use rand_core::OsRng;

const SENDER_KDF: &str = "hive envelope v1 sender";
const PAYLOAD_KDF: &str = "hive envelope v1 payload";

const SEALED_SENDER_SIZE: usize = PUBLIC_KEY_SIZE + TAG_SIZE;

/// Key selection for [`wrap`].
#[derive(Clone, Copy)]
pub enum WrapMode<'a> {
    /// Seal under a shared symmetric key.
    Symmetric(&'a AeadKey),
    /// Seal to the holder of the matching private key.
    Asymmetric(&'a PublicKey),
}

/// Parameters for [`wrap`].
#[derive(Clone, Copy)]
pub struct WrapParams<'a> {
    /// The sender identity whose public key travels inside the envelope.
    pub sender: &'a PrivateKey,
    /// Symmetric or asymmetric sealing.
    pub mode: WrapMode<'a>,
    /// Associated data authenticated but not encrypted.
    pub aad: &'a [u8],
}

/// A successfully opened envelope.
#[derive(Debug)]
pub struct Unwrapped {
    /// Decrypted payload.
    pub payload: Vec<u8>,
    /// Static public key of the sender.
    pub sender: PublicKey,
}

/// Seal `payload` according to `params`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] if the recipient key is a
/// low-order point, or [`CryptoError::EncryptionFailed`] if the AEAD fails.
pub fn wrap(payload: &[u8], params: &WrapParams<'_>) -> Result<Vec<u8>, CryptoError> {
    let nonce = Nonce::generate(&mut OsRng);
    let sender_pub = params.sender.public_key();

    match params.mode {
        WrapMode::Symmetric(key) => {
            let mut plaintext = Vec::with_capacity(PUBLIC_KEY_SIZE + payload.len());
            plaintext.extend_from_slice(sender_pub.as_bytes());
            plaintext.extend_from_slice(payload);

            let ciphertext = key.encrypt(&nonce, &plaintext, params.aad)?;
            let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
            out.extend_from_slice(nonce.as_bytes());
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        WrapMode::Asymmetric(recipient) => {
            let ephemeral = PrivateKey::generate(&mut OsRng);
            let ephemeral_pub = ephemeral.public_key();

            let es = ephemeral
                .exchange(recipient)
                .ok_or(CryptoError::InvalidPublicKey)?;
            let ss = params
                .sender
                .exchange(recipient)
                .ok_or(CryptoError::InvalidPublicKey)?;

            let k1 = AeadKey::new(Kdf::new(SENDER_KDF).derive_key_from(&[
                &es.as_bytes()[..],
                &ephemeral_pub.as_bytes()[..],
                &recipient.as_bytes()[..],
            ]));
            let k2 = AeadKey::new(
                Kdf::new(PAYLOAD_KDF).derive_key_from(&[&k1.as_bytes()[..], &ss.as_bytes()[..]]),
            );

            let sealed_sender = k1.encrypt(&nonce, sender_pub.as_bytes(), params.aad)?;
            let sealed_payload = k2.encrypt(&nonce, payload, params.aad)?;

            let mut out = Vec::with_capacity(
                PUBLIC_KEY_SIZE + NONCE_SIZE + sealed_sender.len() + sealed_payload.len(),
            );
            out.extend_from_slice(ephemeral_pub.as_bytes());
            out.extend_from_slice(nonce.as_bytes());
            out.extend_from_slice(&sealed_sender);
            out.extend_from_slice(&sealed_payload);
            Ok(out)
        }
    }
}

/// Open an envelope sealed with [`WrapMode::Symmetric`].
///
/// # Errors
///
/// Returns [`CryptoError::InvalidEnvelope`] when the input is too short and
/// [`CryptoError::DecryptionFailed`] when the key does not match.
pub fn unwrap_symmetric(
    sealed: &[u8],
    key: &AeadKey,
    aad: &[u8],
) -> Result<Unwrapped, CryptoError> {
    if sealed.len() < NONCE_SIZE + PUBLIC_KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidEnvelope(format!(
            "symmetric envelope of {} bytes",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce)
        .ok_or_else(|| CryptoError::InvalidEnvelope("nonce".to_string()))?;

    let mut plaintext = key.decrypt(&nonce, ciphertext, aad)?;
    let payload = plaintext.split_off(PUBLIC_KEY_SIZE);
    let sender = PublicKey::from_slice(&plaintext)?;

    Ok(Unwrapped { payload, sender })
}

/// Open an envelope sealed with [`WrapMode::Asymmetric`] to `recipient`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidEnvelope`] when the input is too short and
/// [`CryptoError::DecryptionFailed`] when it was not sealed to `recipient`.
pub fn unwrap_asymmetric(
    sealed: &[u8],
    recipient: &PrivateKey,
    aad: &[u8],
) -> Result<Unwrapped, CryptoError> {
    let header = PUBLIC_KEY_SIZE + NONCE_SIZE + SEALED_SENDER_SIZE;
    if sealed.len() < header + TAG_SIZE {
        return Err(CryptoError::InvalidEnvelope(format!(
            "asymmetric envelope of {} bytes",
            sealed.len()
        )));
    }

    let (ephemeral_pub, rest) = sealed.split_at(PUBLIC_KEY_SIZE);
    let (nonce, rest) = rest.split_at(NONCE_SIZE);
    let (sealed_sender, sealed_payload) = rest.split_at(SEALED_SENDER_SIZE);

    let ephemeral_pub = PublicKey::from_slice(ephemeral_pub)?;
    let nonce = Nonce::from_slice(nonce)
        .ok_or_else(|| CryptoError::InvalidEnvelope("nonce".to_string()))?;
    let recipient_pub = recipient.public_key();

    let es = recipient
        .exchange(&ephemeral_pub)
        .ok_or(CryptoError::InvalidPublicKey)?;
    let k1 = AeadKey::new(Kdf::new(SENDER_KDF).derive_key_from(&[
        &es.as_bytes()[..],
        &ephemeral_pub.as_bytes()[..],
        &recipient_pub.as_bytes()[..],
    ]));

    let sender = PublicKey::from_slice(&k1.decrypt(&nonce, sealed_sender, aad)?)?;
    let ss = recipient
        .exchange(&sender)
        .ok_or(CryptoError::InvalidPublicKey)?;
    let k2 = AeadKey::new(Kdf::new(PAYLOAD_KDF).derive_key_from(&[&k1.as_bytes()[..], &ss.as_bytes()[..]]));

    let payload = k2.decrypt(&nonce, sealed_payload, aad)?;
    Ok(Unwrapped { payload, sender })
}
