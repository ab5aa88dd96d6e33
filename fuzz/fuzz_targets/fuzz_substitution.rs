//! Fuzz target for text substitution.
//!
//! This tests that rule application never panics on arbitrary input
//! and matches a sequential `str::replace` fold.

#![no_main]

use channel_mirror::transform::text::apply_rules;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, Vec<(&str, &str)>)| {
    let (text, rules) = data;

    // Should never panic
    let out = apply_rules(text, rules.iter().copied());

    let expected = rules
        .iter()
        .filter(|(from, _)| !from.is_empty())
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to));
    assert_eq!(out, expected);
});
