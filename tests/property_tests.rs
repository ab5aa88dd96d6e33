//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use channel_mirror::resilience::RetryPolicy;
use channel_mirror::transform::text::apply_rules;
use channel_mirror::transform::video::escape_filter_value;
use channel_mirror::validate_reference;
use channel_mirror::wizard::{WizardInput, WizardState};
use channel_mirror::WizardStep;
use proptest::prelude::*;
use std::time::Duration;

const FILTER_DELIMITERS: &[char] = &['\\', ':', '\'', ',', ';', '[', ']'];

// =============================================================================
// Text Substitution Properties
// =============================================================================

fn rule_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-dA-D]{1,3}", "[a-dA-D ]{0,3}"), 0..6)
}

proptest! {
    /// No rules: text comes back untouched
    #[test]
    fn substitution_without_rules_is_identity(text in "\\PC{0,200}") {
        prop_assert_eq!(apply_rules(&text, std::iter::empty()), text);
    }

    /// Rules apply one after another, each over the previous output
    #[test]
    fn substitution_is_sequential_replace(text in "[a-dA-D ]{0,60}", rules in rule_strategy()) {
        let expected = rules
            .iter()
            .fold(text.clone(), |acc, (from, to)| acc.replace(from.as_str(), to));
        let actual = apply_rules(&text, rules.iter().map(|(a, b)| (a.as_str(), b.as_str())));
        prop_assert_eq!(actual, expected);
    }

    /// A rule whose word is absent changes nothing
    #[test]
    fn substitution_absent_word_is_noop(text in "[a-z ]{0,60}", replacement in "\\PC{0,10}") {
        let out = apply_rules(&text, [("ZZZ", replacement.as_str())]);
        prop_assert_eq!(out, text);
    }

    /// Matching is case-sensitive
    #[test]
    fn substitution_is_case_sensitive(text in "[A-Z ]{0,40}") {
        let out = apply_rules(&text, [("a", "x"), ("b", "y")]);
        prop_assert_eq!(out, text);
    }

    /// Empty originals never interleave
    #[test]
    fn substitution_ignores_empty_original(text in "\\PC{0,50}", replacement in "[a-z]{1,5}") {
        prop_assert_eq!(apply_rules(&text, [("", replacement.as_str())]), text);
    }
}

// =============================================================================
// Reference Validation Properties
// =============================================================================

proptest! {
    /// Any @username is accepted and trimmed
    #[test]
    fn reference_username_accepted(name in "[A-Za-z0-9_]{0,32}", pad in " {0,3}") {
        let raw = format!("{}@{}{}", pad, name, pad);
        let accepted = validate_reference(&raw).unwrap();
        prop_assert_eq!(accepted, format!("@{}", name));
    }

    /// Bare digit strings are accepted
    #[test]
    fn reference_digits_accepted(id in 1u64..u64::MAX) {
        prop_assert!(validate_reference(&id.to_string()).is_ok());
    }

    /// -100 prefixed channel ids are accepted
    #[test]
    fn reference_channel_id_accepted(id in 0u64..10_000_000_000u64) {
        let raw = format!("-100{}", id);
        prop_assert_eq!(validate_reference(&raw).unwrap(), raw);
    }

    /// Anything starting with a letter is rejected
    #[test]
    fn reference_words_rejected(raw in "[A-Za-z][A-Za-z0-9_ ]{0,30}") {
        prop_assert!(validate_reference(&raw).is_err());
    }

    /// Negative ids without the channel prefix are rejected
    #[test]
    fn reference_plain_negative_rejected(id in 1u64..100u64) {
        let raw = format!("-{}", id);
        prop_assert!(validate_reference(&raw).is_err());
    }

    /// Validation never panics on arbitrary input
    #[test]
    fn reference_validation_no_panic(raw in "\\PC*") {
        let _ = validate_reference(&raw);
    }
}

// =============================================================================
// Filter Escaping Properties
// =============================================================================

fn unescape(escaped: &str) -> String {
    let mut out = String::new();
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

proptest! {
    /// Escaping loses nothing
    #[test]
    fn filter_escape_unescapes_to_input(raw in "\\PC{0,100}") {
        prop_assert_eq!(unescape(&escape_filter_value(&raw)), raw);
    }

    /// Every delimiter in the output is preceded by a backslash
    #[test]
    fn filter_escape_leaves_no_bare_delimiter(raw in "[a-z:',;\\[\\]\\\\/ .]{0,60}") {
        let escaped = escape_filter_value(&raw);
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                prop_assert!(chars.next().is_some(), "dangling escape in {:?}", escaped);
            } else {
                prop_assert!(!FILTER_DELIMITERS.contains(&c), "bare {:?} in {:?}", c, escaped);
            }
        }
    }

    /// Plain paths pass through unchanged
    #[test]
    fn filter_escape_plain_is_identity(raw in "[a-zA-Z0-9/._-]{0,60}") {
        prop_assert_eq!(escape_filter_value(&raw), raw);
    }
}

// =============================================================================
// Retry Policy Properties
// =============================================================================

proptest! {
    /// The sleep is never shorter than the signalled wait
    #[test]
    fn retry_sleep_covers_wait(wait_ms in 0u64..10_000_000u64, pad_ms in 0u64..10_000u64) {
        let policy = RetryPolicy::delivery(Duration::from_millis(pad_ms));
        let wait = Duration::from_millis(wait_ms);
        let sleep = policy.sleep_for(wait);
        prop_assert!(sleep >= wait);
        prop_assert_eq!(sleep, wait + Duration::from_millis(pad_ms));
    }

    /// Huge waits saturate instead of overflowing
    #[test]
    fn retry_sleep_saturates(pad_ms in 1u64..10_000u64) {
        let policy = RetryPolicy::history(Duration::from_millis(pad_ms));
        prop_assert_eq!(policy.sleep_for(Duration::MAX), Duration::MAX);
    }
}

// =============================================================================
// Wizard Properties
// =============================================================================

fn input_strategy() -> impl Strategy<Value = WizardInput> {
    prop_oneof![
        "\\PC{0,40}".prop_map(WizardInput::Text),
        "@[a-z]{1,8}".prop_map(WizardInput::Text),
        any::<bool>().prop_map(WizardInput::Restricted),
    ]
}

fn start_strategy() -> impl Strategy<Value = WizardState> {
    prop_oneof![
        Just(WizardState::Idle),
        Just(WizardState::AwaitingSource),
        (1i64..100).prop_map(|connection_id| WizardState::AwaitingOriginalWord { connection_id }),
        (1i64..100).prop_map(|connection_id| WizardState::AwaitingWatermark { connection_id }),
    ]
}

proptest! {
    /// Arbitrary input never panics; completion always lands in Idle,
    /// and rejection never moves the state
    #[test]
    fn wizard_transitions_are_consistent(
        start in start_strategy(),
        inputs in prop::collection::vec(input_strategy(), 0..12),
    ) {
        let mut state = start;
        for input in inputs {
            let before = state.clone();
            let (next, step) = state.next(input);
            match step {
                WizardStep::Completed(_) => prop_assert!(next.is_idle()),
                WizardStep::Rejected { .. } | WizardStep::NotExpected => prop_assert_eq!(&next, &before),
                WizardStep::Ask(_) => prop_assert!(!next.is_idle()),
                WizardStep::Cancelled => prop_assert!(false, "next() never cancels"),
            }
            state = next;
        }
    }

    /// Idle accepts nothing
    #[test]
    fn wizard_idle_ignores_input(input in input_strategy()) {
        let (next, step) = WizardState::Idle.next(input);
        prop_assert!(next.is_idle());
        prop_assert_eq!(step, WizardStep::NotExpected);
    }
}
