//! Full-text normalization helpers (spec §6): lowercase, strip diacritics,
//! split on non-letter characters, discard empty terms.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::keypath::get_value_for_single_keypath;
use crate::value::Item;

/// Matches runs of non-letter characters; terms are split on this boundary.
static TERM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Alphabetic}]+").expect("static pattern is valid"));

/// Split and normalize a search phrase into terms, per the
/// `breakAndNormalizeSearchPhrase` contract.
#[must_use]
pub fn break_and_normalize_search_phrase(phrase: &str) -> Vec<String> {
    normalize(phrase)
}

/// Derive the full-text index words for an item at `path`, per the
/// `getFullTextIndexWordsForItem` contract. Non-string values contribute no
/// words.
#[must_use]
pub fn get_full_text_index_words_for_item(path: &str, item: &Item) -> Vec<String> {
    match get_value_for_single_keypath(item, path).and_then(|v| v.as_str()) {
        Some(text) => normalize(text),
        None => Vec::new(),
    }
}

fn normalize(text: &str) -> Vec<String> {
    // Strip diacritics: NFKD-decompose, then drop combining marks. Unicode
    // general category "Mark, Nonspacing" (Mn) covers the combining
    // diacritics produced by decomposition (e.g. U+0301 COMBINING ACUTE
    // ACCENT).
    let decomposed: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let lowercased = decomposed.to_lowercase();
    TERM_BOUNDARY
        .split(&lowercased)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}' // Combining Diacritical Marks
        | '\u{1AB0}'..='\u{1AFF}' // Combining Diacritical Marks Extended
        | '\u{1DC0}'..='\u{1DFF}' // Combining Diacritical Marks Supplement
        | '\u{20D0}'..='\u{20FF}' // Combining Diacritical Marks for Symbols
        | '\u{FE20}'..='\u{FE2F}' // Combining Half Marks
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_lowercases_and_drops_empties() {
        let terms = break_and_normalize_search_phrase("The Quick, Brown Fox!!");
        assert_eq!(terms, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn strips_diacritics() {
        let terms = break_and_normalize_search_phrase("café résumé");
        assert_eq!(terms, vec!["cafe", "resume"]);
    }

    #[test]
    fn non_string_field_has_no_words() {
        let item = json!({"body": 5});
        assert!(get_full_text_index_words_for_item("body", &item).is_empty());
    }

    #[test]
    fn string_field_is_normalized() {
        let item = json!({"body": "Quick Fox"});
        assert_eq!(
            get_full_text_index_words_for_item("body", &item),
            vec!["quick", "fox"]
        );
    }

    #[test]
    fn empty_phrase_yields_no_terms() {
        assert!(break_and_normalize_search_phrase("   ").is_empty());
    }
}
