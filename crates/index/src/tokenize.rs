//! Shared tokenisation for the sparse indices.
//!
//! Both BM25 and TF-IDF see exactly the same token stream: lowercased,
//! punctuation stripped, whitespace split. No stemming.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use unicode_segmentation::UnicodeSegmentation;

/// English stop-words removed from TF-IDF features (BM25 keeps them; its IDF
/// already discounts ubiquitous terms).
pub static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had",
        "has", "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "of",
        "on", "or", "our", "she", "so", "that", "the", "their", "then", "there", "these",
        "they", "this", "to", "was", "we", "were", "what", "when", "which", "while", "who",
        "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercase and split on unicode word boundaries, dropping punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .unicode_words()
        .map(|w| w.to_string())
        .collect()
}

/// Tokenise and drop stop-words.
pub fn tokenize_filtered(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// 1- and 2-grams over a filtered token stream, in document order.
pub fn ngrams(tokens: &[String]) -> Vec<String> {
    let mut features = Vec::with_capacity(tokens.len() * 2);
    for (i, token) in tokens.iter().enumerate() {
        features.push(token.clone());
        if let Some(next) = tokens.get(i + 1) {
            features.push(format!("{token} {next}"));
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation() {
        let tokens = tokenize("UPI timeout, on Axis-Bank!");
        assert_eq!(tokens, vec!["upi", "timeout", "on", "axis", "bank"]);
    }

    #[test]
    fn test_stop_words_removed() {
        let tokens = tokenize_filtered("the payment is stuck at the gateway");
        assert_eq!(tokens, vec!["payment", "stuck", "gateway"]);
    }

    #[test]
    fn test_ngrams_include_bigrams() {
        let tokens: Vec<String> = ["upi", "timeout", "axis"]
            .into_iter()
            .map(String::from)
            .collect();
        let features = ngrams(&tokens);
        assert!(features.contains(&"upi timeout".to_string()));
        assert!(features.contains(&"timeout axis".to_string()));
        assert!(features.contains(&"axis".to_string()));
        assert_eq!(features.len(), 5);
    }
}
