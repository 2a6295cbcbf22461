//! Fuzz target for disk tier sidecar decoding.
//!
//! Sidecars are read back from disk at startup, so any byte sequence must
//! decode to a record or an error without panicking.

#![no_main]

use docforge_core::cache::record::{decode_meta, encode_meta};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(meta) = decode_meta(data) {
        let encoded = encode_meta(&meta).expect("decoded sidecar re-encodes");
        assert!(decode_meta(&encoded).is_ok());
    }
});
