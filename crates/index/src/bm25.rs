//! Okapi BM25 over an inverted index.
//!
//! Scores are raw here; the snapshot layer min-max normalises them within a
//! result batch so fusion weights carry a consistent meaning.

use std::collections::{HashMap, HashSet};

/// Okapi parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalisation strength.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Inverted index keyed by document ordinal.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// term -> (doc ordinal -> term frequency)
    postings: HashMap<String, HashMap<usize, u32>>,
    /// doc ordinal -> document length in terms
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
    /// term -> number of documents containing it
    doc_frequencies: HashMap<String, u32>,
    params: Bm25Params,
}

impl Bm25Index {
    /// Build from pre-tokenised documents, ordinal = position in the slice.
    pub fn build(documents: &[Vec<String>], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, HashMap<usize, u32>> = HashMap::new();
        let mut doc_frequencies: HashMap<String, u32> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(documents.len());

        for (ordinal, terms) in documents.iter().enumerate() {
            doc_lengths.push(terms.len() as u32);

            let mut term_freqs: HashMap<&str, u32> = HashMap::new();
            for term in terms {
                *term_freqs.entry(term.as_str()).or_insert(0) += 1;
            }

            for (term, freq) in term_freqs {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .insert(ordinal, freq);
                *doc_frequencies.entry(term.to_string()).or_insert(0) += 1;
            }
        }

        let total: u32 = doc_lengths.iter().sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / doc_lengths.len() as f32
        };

        Self {
            postings,
            doc_lengths,
            avg_doc_length,
            doc_frequencies,
            params,
        }
    }

    pub fn num_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    /// IDF with the +1 shift so scores stay positive for common terms.
    fn idf(&self, term: &str) -> f32 {
        let df = self.doc_frequencies.get(term).copied().unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        let n = self.num_docs() as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, ordinal: usize, query_terms: &[String]) -> f32 {
        let doc_length = self.doc_lengths.get(ordinal).copied().unwrap_or(0) as f32;
        let mut score = 0.0;

        for term in query_terms {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }

            let tf = self
                .postings
                .get(term)
                .and_then(|p| p.get(&ordinal))
                .copied()
                .unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }

            let numerator = tf * (self.params.k1 + 1.0);
            let denominator = tf
                + self.params.k1
                    * (1.0 - self.params.b + self.params.b * doc_length / self.avg_doc_length);
            score += idf * (numerator / denominator);
        }

        score
    }

    /// Top-k candidates containing at least one query term, raw scores,
    /// sorted score-desc with ordinal as the deterministic tie-break.
    pub fn retrieve(&self, query_terms: &[String], k: usize) -> Vec<(usize, f32)> {
        if query_terms.is_empty() || self.num_docs() == 0 {
            return Vec::new();
        }

        let mut candidates: HashSet<usize> = HashSet::new();
        for term in query_terms {
            if let Some(postings) = self.postings.get(term) {
                candidates.extend(postings.keys());
            }
        }

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|ordinal| (ordinal, self.score(ordinal, query_terms)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}
