//! TF-IDF matrix over 1-2 gram features.
//!
//! Stop-words are removed and the vocabulary is capped at 5000 features,
//! selected by document frequency (ties broken lexically so rebuilds are
//! deterministic). Document rows are l2-normalised, so cosine similarity is a
//! dot product against the normalised query vector.

use std::collections::HashMap;

pub const MAX_FEATURES: usize = 5000;

#[derive(Debug, Clone, Default)]
pub struct TfidfMatrix {
    /// feature -> column
    vocabulary: HashMap<String, usize>,
    /// column -> idf
    idf: Vec<f32>,
    /// doc ordinal -> sparse l2-normalised row
    rows: Vec<HashMap<usize, f32>>,
}

impl TfidfMatrix {
    /// Build from per-document feature streams (already filtered 1-2 grams).
    pub fn build(documents: &[Vec<String>]) -> Self {
        let num_docs = documents.len();
        if num_docs == 0 {
            return Self::default();
        }

        // Document frequency per feature.
        let mut doc_freq: HashMap<&str, u32> = HashMap::new();
        for features in documents {
            let mut seen: Vec<&str> = features.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for feature in seen {
                *doc_freq.entry(feature).or_insert(0) += 1;
            }
        }

        // Cap the vocabulary by document frequency, lexical tie-break.
        let mut ranked: Vec<(&str, u32)> = doc_freq.iter().map(|(f, df)| (*f, *df)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(MAX_FEATURES);

        let mut vocabulary = HashMap::with_capacity(ranked.len());
        let mut idf = Vec::with_capacity(ranked.len());
        for (column, (feature, df)) in ranked.into_iter().enumerate() {
            vocabulary.insert(feature.to_string(), column);
            // Smoothed idf, as in the usual vectoriser formulation.
            idf.push(((1.0 + num_docs as f32) / (1.0 + df as f32)).ln() + 1.0);
        }

        let rows = documents
            .iter()
            .map(|features| Self::vectorise_with(&vocabulary, &idf, features))
            .collect();

        Self {
            vocabulary,
            idf,
            rows,
        }
    }

    fn vectorise_with(
        vocabulary: &HashMap<String, usize>,
        idf: &[f32],
        features: &[String],
    ) -> HashMap<usize, f32> {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        for feature in features {
            if let Some(&column) = vocabulary.get(feature) {
                *counts.entry(column).or_insert(0.0) += 1.0;
            }
        }

        for (column, value) in counts.iter_mut() {
            *value *= idf[*column];
        }

        let norm: f32 = counts.values().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in counts.values_mut() {
                *value /= norm;
            }
        }
        counts
    }

    /// Project query features into the stored vocabulary, l2-normalised.
    pub fn vectorise(&self, features: &[String]) -> HashMap<usize, f32> {
        Self::vectorise_with(&self.vocabulary, &self.idf, features)
    }

    /// Cosine similarity of each document against the query, top-k,
    /// sorted score-desc with ordinal tie-break. Zero-scoring docs are
    /// omitted.
    pub fn retrieve(&self, features: &[String], k: usize) -> Vec<(usize, f32)> {
        let query = self.vectorise(features);
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(ordinal, row)| {
                let dot: f32 = query
                    .iter()
                    .filter_map(|(column, qv)| row.get(column).map(|dv| qv * dv))
                    .sum();
                (dot > 0.0).then_some((ordinal, dot))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }
}
