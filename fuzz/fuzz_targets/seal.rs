//! Fuzz target for envelope sealing
//!
//! Tests that opening arbitrary sealed payloads fails cleanly, and that
//! sealed payloads open with the right key.

#![no_main]

use arbitrary::Arbitrary;
use hive_crypto::aead::AeadKey;
use hive_crypto::x25519::PrivateKey;
use hive_crypto::{WrapMode, WrapParams, unwrap_asymmetric, unwrap_symmetric, wrap};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct SealInput {
    key: [u8; 32],
    sender: [u8; 32],
    recipient: [u8; 32],
    payload: Vec<u8>,
    aad: Vec<u8>,
    sealed: Vec<u8>,
}

fuzz_target!(|input: SealInput| {
    let key = AeadKey::new(input.key);
    let sender = PrivateKey::from_bytes(input.sender);
    let recipient = PrivateKey::from_bytes(input.recipient);

    // Opening arbitrary bytes should never panic
    let _ = unwrap_symmetric(&input.sealed, &key, &input.aad);
    let _ = unwrap_asymmetric(&input.sealed, &recipient, &input.aad);

    let params = WrapParams {
        mode: WrapMode::Symmetric(&key),
        sender: &sender,
        aad: &input.aad,
    };
    if let Ok(sealed) = wrap(&input.payload, &params) {
        let opened = unwrap_symmetric(&sealed, &key, &input.aad).expect("own seal opens");
        assert_eq!(opened.payload, input.payload);
    }

    let recipient_pub = recipient.public_key();
    let params = WrapParams {
        mode: WrapMode::Asymmetric(&recipient_pub),
        sender: &sender,
        aad: &input.aad,
    };
    if let Ok(sealed) = wrap(&input.payload, &params) {
        let opened = unwrap_asymmetric(&sealed, &recipient, &input.aad).expect("own seal opens");
        assert_eq!(opened.payload, input.payload);
    }
});
