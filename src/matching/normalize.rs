// src/matching/normalize.rs

use once_cell::sync::Lazy;
use regex::Regex;

/// Status and site qualifiers that get appended to names in the back office.
const QUALIFIER_TOKENS: [&str; 16] = [
    "revised", "rev", "cli", "copy", "duplicate", "dup", "old", "new", "closed", "cancelled",
    "canceled", "void", "inactive", "test", "redo", "resubmitted",
];

const STATE_ABBREVIATIONS: [&str; 51] = [
    "al", "ak", "az", "ar", "ca", "co", "ct", "de", "dc", "fl", "ga", "hi", "id", "il", "in",
    "ia", "ks", "ky", "la", "me", "md", "ma", "mi", "mn", "ms", "mo", "mt", "ne", "nv", "nh",
    "nj", "nm", "ny", "nc", "nd", "oh", "ok", "or", "pa", "ri", "sc", "sd", "tn", "tx", "ut",
    "vt", "va", "wa", "wv", "wi", "wy",
];

// A qualifier only counts when it is set off by a separator ("- CLI", ", CO", "(REVISED)").
// A bare trailing "OR" or "IN" is part of the name.
static TRAILING_QUALIFIER: Lazy<Regex> = Lazy::new(|| {
    let tokens = QUALIFIER_TOKENS
        .iter()
        .chain(STATE_ABBREVIATIONS.iter())
        .copied()
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)\s*(?:[-–—,/:]\s*\(?|\(|\[)\s*(?:{})\s*[)\]]?\s*$",
        tokens
    ))
    .expect("trailing qualifier pattern is valid")
});

/// How hard a scope squeezes names before comparing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationProfile {
    /// Qualifier suffixes removed and whitespace collapsed. Case is preserved.
    Standard,
    /// Whitespace collapsed and lower-cased, nothing removed. Used where names are grouped
    /// only on exact equality, so "Portland, OR" and "Portland, ME" stay distinct.
    Exact,
    /// Lower-cased with punctuation stripped. Used for person names.
    Aggressive,
}

/// Canonicalizes a display name. Total over all inputs; empty input gives "".
pub fn normalize_name(raw: &str, profile: NormalizationProfile) -> String {
    match profile {
        NormalizationProfile::Standard => collapse_whitespace(&strip_trailing_qualifiers(raw)),
        NormalizationProfile::Exact => collapse_whitespace(raw).to_lowercase(),
        NormalizationProfile::Aggressive => {
            let mut normalized = strip_trailing_qualifiers(raw).to_lowercase();
            let char_substitutions = [
                ("&", " and "),
                ("/", " "),
                ("-", " "),
                (".", " "),
                ("_", " "),
                ("'", ""),
                ("’", ""),
                ("(", " "),
                (")", " "),
                (",", " "),
            ];
            for (pattern, replacement) in &char_substitutions {
                normalized = normalized.replace(pattern, replacement);
            }
            let normalized: String = normalized
                .chars()
                .filter(|c| c.is_alphanumeric() || c.is_whitespace())
                .collect();
            collapse_whitespace(&normalized)
        }
    }
}

pub fn normalize_optional(raw: Option<&str>, profile: NormalizationProfile) -> String {
    raw.map(|s| normalize_name(s, profile)).unwrap_or_default()
}

/// Removes qualifier suffixes repeatedly, so "X - CO - REVISED" becomes "X".
fn strip_trailing_qualifiers(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let next = TRAILING_QUALIFIER.replace(&current, "").trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_strips_status_suffix() {
        assert_eq!(
            normalize_name("Smith Attic - REVISED", NormalizationProfile::Standard),
            "Smith Attic"
        );
        assert_eq!(
            normalize_name("Smith   Attic - cli", NormalizationProfile::Standard),
            "Smith Attic"
        );
        assert_eq!(
            normalize_name("Big Job (Revised)", NormalizationProfile::Standard),
            "Big Job"
        );
    }

    #[test]
    fn test_stacked_qualifiers_are_all_removed() {
        assert_eq!(
            normalize_name("Miller Crawlspace - CO - REVISED", NormalizationProfile::Standard),
            "Miller Crawlspace"
        );
        assert_eq!(
            normalize_name("Denver Metro, CO", NormalizationProfile::Standard),
            "Denver Metro"
        );
    }

    #[test]
    fn test_bare_state_like_words_survive() {
        assert_eq!(
            normalize_name("Jobs In OR", NormalizationProfile::Standard),
            "Jobs In OR"
        );
        assert_eq!(
            normalize_name("Revised Estimate", NormalizationProfile::Standard),
            "Revised Estimate"
        );
    }

    #[test]
    fn test_exact_profile_keeps_qualifiers() {
        assert_eq!(
            normalize_name("  Denver   NORTH ", NormalizationProfile::Exact),
            "denver north"
        );
        assert_eq!(
            normalize_name("Portland, OR", NormalizationProfile::Exact),
            "portland, or"
        );
        assert_ne!(
            normalize_name("Portland, OR", NormalizationProfile::Exact),
            normalize_name("Portland, ME", NormalizationProfile::Exact)
        );
    }

    #[test]
    fn test_aggressive_profile_strips_punctuation() {
        assert_eq!(
            normalize_name("Eben W.", NormalizationProfile::Aggressive),
            "eben w"
        );
        assert_eq!(
            normalize_name("O'Brien-Smith", NormalizationProfile::Aggressive),
            "obrien smith"
        );
    }

    #[test]
    fn test_empty_and_missing_input() {
        assert_eq!(normalize_name("", NormalizationProfile::Standard), "");
        assert_eq!(normalize_name("   ", NormalizationProfile::Aggressive), "");
        assert_eq!(normalize_optional(None, NormalizationProfile::Exact), "");
    }
}
