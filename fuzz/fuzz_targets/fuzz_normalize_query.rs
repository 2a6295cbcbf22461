//! Fuzz target for search query normalization.

#![no_main]

use docforge_core::cache::normalize_query;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|query: &str| {
    let once = normalize_query(query);
    // Normalizing twice changes nothing.
    assert_eq!(normalize_query(&once), once);
});
