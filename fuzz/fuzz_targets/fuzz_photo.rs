//! Fuzz target for photo watermarking.
//!
//! This tests that arbitrary bytes handed to the image decoder return
//! an error instead of panicking.

#![no_main]

use channel_mirror::transform::photo::{labelled, tiled};
use channel_mirror::WatermarkConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = WatermarkConfig::default();

    // Should never panic
    let _ = tiled(data, "@mirror", None, &config);
    let _ = labelled(data, "@mirror", None, &config);
});
