//! Fuzz target for push payload parsing.
//!
//! Tests that the receive-pack payload parser handles arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed payloads come back as None; no input may panic.
    let _ = gitgate::parse_push_payload(data);
});
