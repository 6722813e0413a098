//! Fuzz target for request routing.
//!
//! Tests that the path and service parser handles arbitrary input without
//! panicking.

#![no_main]

use http::Method;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // First line is the request path, an optional second line the service.
    let mut lines = text.lines();
    let path = lines.next().unwrap_or("");
    let service = lines.next();

    for method in [Method::GET, Method::POST, Method::DELETE] {
        let _ = gitgate::parse_request(&method, path, service);
    }
});
