// src/matching/similarity.rs
//
// Fuzzy name scoring. The main scorer is optimistic: it computes several independent
// measures and keeps the best, so a strong match on any one of them is a match.

use serde::Serialize;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

pub const MAX_SCORE: f64 = 100.0;

/// Score returned by the light scorer when one name contains the other.
pub const CONTAINMENT_SCORE: f64 = 0.9;
const WORD_OVERLAP_WEIGHT: f64 = 0.6;
const CHAR_SIMILARITY_WEIGHT: f64 = 0.4;
const MIN_WORD_LENGTH_FOR_CHAR_SIMILARITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub ratio: f64,
    pub partial: f64,
    pub token_sort: f64,
    pub token_set: f64,
}

impl SimilarityBreakdown {
    pub fn best(&self) -> f64 {
        self.ratio
            .max(self.partial)
            .max(self.token_sort)
            .max(self.token_set)
            .clamp(0.0, MAX_SCORE)
    }
}

/// 0–100 similarity of two names. Exact equality after preprocessing is always 100;
/// empty names never match anything.
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let (a, b) = (preprocess(a), preprocess(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return MAX_SCORE;
    }
    breakdown_of_processed(&a, &b).best()
}

pub fn similarity_breakdown(a: &str, b: &str) -> SimilarityBreakdown {
    breakdown_of_processed(&preprocess(a), &preprocess(b))
}

fn breakdown_of_processed(a: &str, b: &str) -> SimilarityBreakdown {
    SimilarityBreakdown {
        ratio: ratio(a, b),
        partial: partial_ratio(a, b),
        token_sort: token_sort_ratio(a, b),
        token_set: token_set_ratio(a, b),
    }
}

/// Lower-cases, turns every non-alphanumeric into a space and collapses whitespace.
fn preprocess(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-string edit distance ratio.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) * MAX_SCORE
}

/// Best ratio of the shorter string against every equally long window of the longer.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (a_chars, b_chars): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    let (shorter, longer) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    if shorter.len() == longer.len() {
        return ratio(a, b);
    }

    let needle: String = shorter.iter().collect();
    let mut best = 0.0_f64;
    for start in 0..=(longer.len() - shorter.len()) {
        let window: String = longer[start..start + shorter.len()].iter().collect();
        let score = normalized_levenshtein(&needle, &window);
        if score > best {
            best = score;
            if best >= 1.0 {
                break;
            }
        }
    }
    best * MAX_SCORE
}

/// Ratio after sorting tokens alphabetically, so reordered words still match.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared tokens against each side's full token set, so extra or missing
/// common words cost little.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).copied().collect::<Vec<_>>().join(" ");
    let only_a = set_a.difference(&set_b).copied().collect::<Vec<_>>().join(" ");
    let only_b = set_b.difference(&set_a).copied().collect::<Vec<_>>().join(" ");

    let combined_a = format!("{} {}", intersection, only_a).trim().to_string();
    let combined_b = format!("{} {}", intersection, only_b).trim().to_string();

    ratio(&intersection, &combined_a)
        .max(ratio(&intersection, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens
}

/// Light 0–1 scorer for person names that are already aggressively normalized.
pub fn sales_person_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(b) || b.contains(a) {
        return CONTAINMENT_SCORE;
    }
    WORD_OVERLAP_WEIGHT * word_overlap_ratio(a, b)
        + CHAR_SIMILARITY_WEIGHT * max_word_char_similarity(a, b)
}

/// Shared distinct words over the larger word count.
fn word_overlap_ratio(a: &str, b: &str) -> f64 {
    let words_a: BTreeSet<&str> = a.split_whitespace().collect();
    let words_b: BTreeSet<&str> = b.split_whitespace().collect();
    let larger = words_a.len().max(words_b.len());
    if larger == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / larger as f64
}

/// Best per-word edit similarity, considering only words of 3+ characters.
fn max_word_char_similarity(a: &str, b: &str) -> f64 {
    let long_words = |s: &'_ str| -> Vec<String> {
        s.split_whitespace()
            .filter(|w| w.chars().count() >= MIN_WORD_LENGTH_FOR_CHAR_SIMILARITY)
            .map(str::to_string)
            .collect()
    };
    let (words_a, words_b) = (long_words(a), long_words(b));

    let mut best = 0.0_f64;
    for wa in &words_a {
        for wb in &words_b {
            best = best.max(normalized_levenshtein(wa, wb));
        }
    }
    best
}
