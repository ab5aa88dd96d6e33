//! Fuzz target for channel reference validation and filter escaping.
//!
//! This tests that operator-supplied strings never panic on their way to
//! the store or into an ffmpeg filter graph.

#![no_main]

use channel_mirror::transform::video::escape_filter_value;
use channel_mirror::validate_reference;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|raw: &str| {
    // Accepted references are trimmed and never empty
    if let Ok(reference) = validate_reference(raw) {
        assert!(!reference.is_empty());
        assert_eq!(reference, reference.trim());
    }

    let escaped = escape_filter_value(raw);
    assert!(escaped.len() >= raw.len());
});
