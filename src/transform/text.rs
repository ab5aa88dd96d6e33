// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Literal text substitution.
//!
//! Rules are applied one after another in insertion order, each as a plain
//! case-sensitive `str::replace` over the output of the previous rule. A later
//! rule therefore sees (and may rewrite) what an earlier rule produced:
//!
//! ```rust
//! use channel_mirror::transform::text::apply_rules;
//!
//! let rules = [("b", "B"), ("A", "X")];
//! assert_eq!(apply_rules("A b C", rules.iter().copied()), "X B C");
//! ```

use crate::store::SubstitutionRule;

/// Apply `(original, replacement)` pairs sequentially.
///
/// Empty originals are ignored; `str::replace` with an empty pattern would
/// interleave the replacement between every character.
pub fn apply_rules<'a, I>(text: &str, rules: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = text.to_string();
    for (original, replacement) in rules {
        if original.is_empty() || !out.contains(original) {
            continue;
        }
        out = out.replace(original, replacement);
    }
    out
}

/// Apply stored rules (already in insertion order) to `text`.
pub fn substitute(text: &str, rules: &[SubstitutionRule]) -> String {
    apply_rules(
        text,
        rules
            .iter()
            .map(|r| (r.original.as_str(), r.replacement.as_str())),
    )
}

/// Caption variant: absent captions stay absent.
pub fn substitute_caption(caption: Option<&str>, rules: &[SubstitutionRule]) -> Option<String> {
    caption.map(|c| substitute(c, rules))
}
