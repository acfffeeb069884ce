//! Fuzz target for envelope decoding
//!
//! Tests that the envelope decoder handles arbitrary input without panicking.

#![no_main]

use hive_core::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding should never panic, only return Ok or Err
    if let Ok(envelope) = Envelope::from_bytes(data, 1 << 20) {
        let _ = envelope.digest();
        let _ = envelope.is_partial();
        let _ = envelope.to_bytes();
    }
});
