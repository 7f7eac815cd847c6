//! Sparse index facade with snapshot publication.
//!
//! Readers take an `Arc` to an immutable snapshot; writers build a complete
//! replacement and publish it with a pointer swap. Readers in flight keep
//! scoring against the snapshot they started with.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bm25::{Bm25Index, Bm25Params};
use crate::tfidf::TfidfMatrix;
use crate::tokenize::{ngrams, tokenize, tokenize_filtered};

/// One indexable document, text = the incident's training text.
#[derive(Debug, Clone)]
pub struct SparseDoc {
    pub id: String,
    pub text: String,
}

/// A scored hit. BM25 scores are min-max normalised within the batch;
/// TF-IDF scores are cosines. Both land in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub id: String,
    pub score: f32,
}

/// Immutable view over one corpus generation.
#[derive(Default)]
pub struct SparseSnapshot {
    docs: Vec<SparseDoc>,
    by_id: HashMap<String, usize>,
    bm25: Bm25Index,
    tfidf: TfidfMatrix,
}

impl SparseSnapshot {
    pub fn build(docs: Vec<SparseDoc>) -> Self {
        let by_id = docs
            .iter()
            .enumerate()
            .map(|(ordinal, doc)| (doc.id.clone(), ordinal))
            .collect();

        let bm25_tokens: Vec<Vec<String>> = docs.iter().map(|d| tokenize(&d.text)).collect();
        let tfidf_features: Vec<Vec<String>> = docs
            .iter()
            .map(|d| ngrams(&tokenize_filtered(&d.text)))
            .collect();

        Self {
            bm25: Bm25Index::build(&bm25_tokens, Bm25Params::default()),
            tfidf: TfidfMatrix::build(&tfidf_features),
            by_id,
            docs,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.docs.iter().map(|d| d.id.as_str())
    }

    /// BM25 search with batch min-max normalisation.
    pub fn search_bm25(&self, query: &str, k: usize) -> Vec<SparseHit> {
        let terms = tokenize(query);
        let raw = self.bm25.retrieve(&terms, k);
        self.to_hits(normalise_min_max(raw))
    }

    /// TF-IDF cosine search.
    pub fn search_tfidf(&self, query: &str, k: usize) -> Vec<SparseHit> {
        let features = ngrams(&tokenize_filtered(query));
        let scored = self.tfidf.retrieve(&features, k);
        self.to_hits(scored)
    }

    fn to_hits(&self, scored: Vec<(usize, f32)>) -> Vec<SparseHit> {
        scored
            .into_iter()
            .filter_map(|(ordinal, score)| {
                self.docs.get(ordinal).map(|doc| SparseHit {
                    id: doc.id.clone(),
                    score,
                })
            })
            .collect()
    }
}

/// Min-max normalise a score batch to `[0, 1]`. A single-score or flat batch
/// maps to 1.0 so the fusion weight still means "matched".
fn normalise_min_max(scored: Vec<(usize, f32)>) -> Vec<(usize, f32)> {
    if scored.is_empty() {
        return scored;
    }
    let max = scored.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
    let min = scored.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
    let range = max - min;

    scored
        .into_iter()
        .map(|(ordinal, score)| {
            let normalised = if range > f32::EPSILON {
                (score - min) / range
            } else {
                1.0
            };
            (ordinal, normalised)
        })
        .collect()
}

/// Reader-many / writer-one sparse index.
///
/// Derived state: the canonical store can always rebuild it from scratch
/// after a crash, so no durability is attempted here.
pub struct SparseIndex {
    snapshot: RwLock<Arc<SparseSnapshot>>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(SparseSnapshot::default())),
        }
    }

    /// Current snapshot; holds no lock after return.
    pub fn snapshot(&self) -> Arc<SparseSnapshot> {
        self.snapshot.read().clone()
    }

    /// Replace the whole index in one publish.
    pub fn rebuild(&self, docs: Vec<SparseDoc>) {
        let next = Arc::new(SparseSnapshot::build(docs));
        tracing::debug!(docs = next.len(), "publishing rebuilt sparse snapshot");
        *self.snapshot.write() = next;
    }

    /// Insert or replace one document and publish the successor snapshot.
    pub fn upsert(&self, doc: SparseDoc) {
        let current = self.snapshot();
        let mut docs: Vec<SparseDoc> = current
            .docs
            .iter()
            .filter(|d| d.id != doc.id)
            .cloned()
            .collect();
        docs.push(doc);
        self.rebuild(docs);
    }

    /// Remove one document and publish the successor snapshot.
    pub fn remove(&self, id: &str) {
        let current = self.snapshot();
        if !current.contains(id) {
            return;
        }
        let docs: Vec<SparseDoc> = current
            .docs
            .iter()
            .filter(|d| d.id != id)
            .cloned()
            .collect();
        self.rebuild(docs);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains(id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn search_bm25(&self, query: &str, k: usize) -> Vec<SparseHit> {
        self.snapshot().search_bm25(query, k)
    }

    pub fn search_tfidf(&self, query: &str, k: usize) -> Vec<SparseHit> {
        self.snapshot().search_tfidf(query, k)
    }
}

impl Default for SparseIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> SparseDoc {
        SparseDoc {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    fn seeded() -> SparseIndex {
        let index = SparseIndex::new();
        index.rebuild(vec![
            doc("JSP-1000", "UPI timeout on Axis Bank. Collect requests timing out."),
            doc("JSP-1005", "Axis PG connection reset. Gateway dropped idle connections."),
            doc("JSP-1010", "Refund webhook retries exhausted for settlement batch."),
        ]);
        index
    }

    #[test]
    fn test_bm25_scores_normalised() {
        let index = seeded();
        let hits = index.search_bm25("UPI timeout", 10);

        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "JSP-1000");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[test]
    fn test_single_hit_normalises_to_one() {
        let index = seeded();
        let hits = index.search_bm25("settlement", 10);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tfidf_matches_topic() {
        let index = seeded();
        let hits = index.search_tfidf("refund webhook", 10);
        assert_eq!(hits[0].id, "JSP-1010");
    }

    #[test]
    fn test_upsert_and_remove_publish_new_snapshots() {
        let index = seeded();
        assert_eq!(index.len(), 3);

        index.upsert(doc("JSP-2000", "Card auth declined spike on new BIN range."));
        assert_eq!(index.len(), 4);
        assert!(index.contains("JSP-2000"));

        index.remove("JSP-1000");
        assert_eq!(index.len(), 3);
        assert!(!index.contains("JSP-1000"));
        assert!(index.search_bm25("UPI timeout collect", 10).iter().all(|h| h.id != "JSP-1000"));
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let index = seeded();
        let before = index.snapshot();

        index.remove("JSP-1000");

        // The retained snapshot still sees the removed doc.
        assert!(before.contains("JSP-1000"));
        assert!(!index.snapshot().contains("JSP-1000"));
    }

    #[test]
    fn test_empty_index_searches() {
        let index = SparseIndex::new();
        assert!(index.search_bm25("anything", 5).is_empty());
        assert!(index.search_tfidf("anything", 5).is_empty());
    }
}
