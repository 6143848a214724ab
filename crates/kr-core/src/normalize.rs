//! Tournament-name normalization shared by the post scorer and the recurring resolver.

use once_cell::sync::Lazy;
use regex::Regex;

static GUARANTEE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\s*[\d,]+(?:\.\d+)?\s*k?\s*(?:gtd|guaranteed)").expect("valid regex")
});
static GUARANTEE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:gtd|guaranteed)\b").expect("valid regex"));
static FREQUENCY_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:weekly|monthly|annual)\b").expect("valid regex"));
static STRUCTURE_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:rebuy|re-entry|freezeout|entry)\b.*$").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "poker", "tournament", "event", "game",
];

/// Lowercased, stripped of guarantee/frequency/structure tokens, alphanumerics only.
pub fn normalize_name(input: &str) -> String {
    let lower = input.to_lowercase();
    let stripped = GUARANTEE_AMOUNT.replace_all(&lower, " ");
    let stripped = GUARANTEE_WORD.replace_all(&stripped, " ");
    let stripped = FREQUENCY_WORD.replace_all(&stripped, " ");
    let stripped = STRUCTURE_TAIL.replace(&stripped, " ");
    stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Original casing with guarantee and frequency tokens removed; used when
/// naming a new recurring template.
pub fn display_name(input: &str) -> String {
    let stripped = GUARANTEE_AMOUNT.replace_all(input, " ");
    let stripped = GUARANTEE_WORD.replace_all(&stripped, " ");
    let stripped = FREQUENCY_WORD.replace_all(&stripped, " ");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '|' | ',' | ':'))
        .to_string()
}

pub fn significant_words(normalized: &str) -> Vec<&str> {
    normalized
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .collect()
}

/// True when both names are non-empty and one contains the other.
pub fn names_contain(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

pub fn shared_significant_words(a: &str, b: &str) -> usize {
    let right = significant_words(b);
    let mut left = significant_words(a);
    left.sort_unstable();
    left.dedup();
    left.iter().filter(|w| right.contains(w)).count()
}
