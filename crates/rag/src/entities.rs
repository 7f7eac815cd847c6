//! Entity extraction for priority boosting and domain gating.
//!
//! Three entity kinds are matched against a fixed vocabulary maintained with
//! the corpus: merchants, payment gateways and banks. Matching is substring
//! with word boundaries, case-insensitive. Error codes are recognised by
//! shape rather than vocabulary.

use once_cell::sync::Lazy;
use regex::Regex;

use incident_core::EntitySet;

/// `UPI_TIMEOUT`-style upper-snake tokens and bare HTTP-ish status codes.
static ERROR_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{2,}_[A-Z0-9_]{2,}|[45]\d{2})\b").expect("valid error code regex"));

const DEFAULT_MERCHANTS: &[&str] = &[
    "snapdeal", "flipkart", "myntra", "meesho", "zomato", "swiggy", "nykaa", "bigbasket",
    "lenskart", "dream11",
];

const DEFAULT_GATEWAYS: &[&str] = &[
    "pinelabs", "razorpay", "payu", "cashfree", "billdesk", "ccavenue", "paytm", "juspay",
    "stripe", "worldline",
];

const DEFAULT_BANKS: &[&str] = &[
    "axis", "hdfc", "icici", "sbi", "kotak", "yes bank", "idfc", "federal", "indusind", "rbl",
];

/// Vocabulary for the three entity kinds.
#[derive(Debug, Clone)]
pub struct EntityVocabulary {
    pub merchants: Vec<String>,
    pub gateways: Vec<String>,
    pub banks: Vec<String>,
}

impl Default for EntityVocabulary {
    fn default() -> Self {
        fn owned(terms: &[&str]) -> Vec<String> {
            terms.iter().map(|t| t.to_string()).collect()
        }
        Self {
            merchants: owned(DEFAULT_MERCHANTS),
            gateways: owned(DEFAULT_GATEWAYS),
            banks: owned(DEFAULT_BANKS),
        }
    }
}

struct CompiledTerm {
    term: String,
    pattern: Regex,
}

fn compile(terms: &[String]) -> Vec<CompiledTerm> {
    terms
        .iter()
        .filter_map(|term| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
            match Regex::new(&pattern) {
                Ok(re) => Some(CompiledTerm {
                    term: term.to_lowercase(),
                    pattern: re,
                }),
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "skipping unparseable entity term");
                    None
                }
            }
        })
        .collect()
}

/// Word-boundary entity extractor over the fixed vocabulary.
pub struct EntityExtractor {
    merchants: Vec<CompiledTerm>,
    gateways: Vec<CompiledTerm>,
    banks: Vec<CompiledTerm>,
}

impl EntityExtractor {
    pub fn new(vocabulary: EntityVocabulary) -> Self {
        Self {
            merchants: compile(&vocabulary.merchants),
            gateways: compile(&vocabulary.gateways),
            banks: compile(&vocabulary.banks),
        }
    }

    /// Extract every known entity mentioned in `text`, lowercased, in
    /// vocabulary order.
    pub fn extract(&self, text: &str) -> EntitySet {
        fn matched(compiled: &[CompiledTerm], text: &str) -> Vec<String> {
            compiled
                .iter()
                .filter(|c| c.pattern.is_match(text))
                .map(|c| c.term.clone())
                .collect()
        }

        let mut error_codes: Vec<String> = ERROR_CODE_RE
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();
        error_codes.sort();
        error_codes.dedup();

        EntitySet {
            merchants: matched(&self.merchants, text),
            gateways: matched(&self.gateways, text),
            banks: matched(&self.banks, text),
            error_codes,
        }
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new(EntityVocabulary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_all_three_kinds() {
        let extractor = EntityExtractor::default();
        let entities =
            extractor.extract("Snapdeal payments via Pinelabs failing at Axis with UPI_TIMEOUT");

        assert_eq!(entities.merchants, vec!["snapdeal"]);
        assert_eq!(entities.gateways, vec!["pinelabs"]);
        assert_eq!(entities.banks, vec!["axis"]);
        assert_eq!(entities.error_codes, vec!["UPI_TIMEOUT"]);
    }

    #[test]
    fn test_case_insensitive_word_boundaries() {
        let extractor = EntityExtractor::default();

        assert_eq!(extractor.extract("RAZORPAY webhook").gateways, vec!["razorpay"]);
        // "maxis" must not match "axis".
        assert!(extractor.extract("maxis telecom outage").banks.is_empty());
    }

    #[test]
    fn test_multi_word_bank() {
        let extractor = EntityExtractor::default();
        assert_eq!(extractor.extract("Yes Bank net banking down").banks, vec!["yes bank"]);
    }

    #[test]
    fn test_status_code_shapes() {
        let extractor = EntityExtractor::default();
        let entities = extractor.extract("gateway returning 502 since noon");
        assert_eq!(entities.error_codes, vec!["502"]);

        // Timestamps and amounts are not status codes.
        assert!(extractor.extract("settled 1502 transactions").error_codes.is_empty());
    }

    #[test]
    fn test_no_entities() {
        let extractor = EntityExtractor::default();
        assert!(extractor.extract("how to bake a cake").is_empty());
    }
}
