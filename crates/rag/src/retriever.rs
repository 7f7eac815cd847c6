//! Hybrid Retriever
//!
//! Runs the dense and the two sparse searches concurrently, union-merges by
//! incident id, fuses scores with fixed weights and applies entity-driven
//! priority boosts. Failure of one path degrades the retrieval instead of
//! failing the request; failure of both yields an empty candidate list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use incident_core::{
    Embedder, EntitySet, IncidentReader, MatchType, PriorityDetails, RetrievalCandidate,
    VectorIndex,
};
use incident_index::SparseIndex;

use crate::entities::EntityExtractor;
use crate::fusion::base_fusion;
use crate::RagError;

/// Retriever configuration.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Each sub-search asks for `overfetch_factor * top_k` items.
    pub overfetch_factor: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self { overfetch_factor: 2 }
    }
}

/// Which retrieval paths contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Full,
    /// Sparse path failed; dense results only.
    SemanticOnly,
    /// Dense path failed; BM25/TF-IDF results only.
    SparseOnly,
    /// Both paths failed.
    Unavailable,
}

impl RetrievalMode {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RetrievalMode::SemanticOnly | RetrievalMode::SparseOnly)
    }
}

/// Ranked retrieval outcome.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub candidates: Vec<RetrievalCandidate>,
    pub mode: RetrievalMode,
    pub query_entities: EntitySet,
}

#[derive(Default, Clone)]
struct ScoreRow {
    semantic: f32,
    bm25: f32,
    tfidf: f32,
}

/// Hybrid retriever combining one dense and two sparse signals.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    sparse: Arc<SparseIndex>,
    extractor: Arc<EntityExtractor>,
    reader: Arc<dyn IncidentReader>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        sparse: Arc<SparseIndex>,
        extractor: Arc<EntityExtractor>,
        reader: Arc<dyn IncidentReader>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            sparse,
            extractor,
            reader,
            config,
        }
    }

    /// Retrieve the top `top_k` candidates for a sanitised query, ordered by
    /// fused score. Admission is not decided here: the semantic validator
    /// sees the full ranked list.
    ///
    /// `deadline` bounds the dense path (embedding + index query); the sparse
    /// searches are CPU-bound and run without suspension on the blocking
    /// pool.
    pub async fn retrieve(&self, query: &str, top_k: usize, deadline: Duration) -> Retrieval {
        let fetch = top_k.saturating_mul(self.config.overfetch_factor).max(top_k);

        let dense_future = self.search_dense(query, fetch, deadline);

        // Sparse search holds one snapshot for both structures.
        let snapshot = self.sparse.snapshot();
        let query_owned = query.to_string();
        let sparse_future = tokio::task::spawn_blocking(move || {
            let bm25 = snapshot.search_bm25(&query_owned, fetch);
            let tfidf = snapshot.search_tfidf(&query_owned, fetch);
            (bm25, tfidf)
        });

        let (dense_result, sparse_result) = tokio::join!(dense_future, sparse_future);

        let mut rows: HashMap<String, ScoreRow> = HashMap::new();
        let mut dense_ok = false;
        let mut sparse_ok = false;

        match dense_result {
            Ok(hits) => {
                dense_ok = true;
                for hit in hits {
                    rows.entry(hit.id).or_default().semantic = hit.score.clamp(0.0, 1.0);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dense retrieval path failed; degrading to sparse-only");
            }
        }

        match sparse_result {
            Ok((bm25, tfidf)) => {
                sparse_ok = true;
                for hit in bm25 {
                    rows.entry(hit.id).or_default().bm25 = hit.score.clamp(0.0, 1.0);
                }
                for hit in tfidf {
                    rows.entry(hit.id).or_default().tfidf = hit.score.clamp(0.0, 1.0);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "sparse retrieval path failed; degrading to semantic-only");
            }
        }

        let mode = match (dense_ok, sparse_ok) {
            (true, true) => RetrievalMode::Full,
            (true, false) => RetrievalMode::SemanticOnly,
            (false, true) => RetrievalMode::SparseOnly,
            (false, false) => RetrievalMode::Unavailable,
        };

        let query_entities = self.extractor.extract(query);

        if mode == RetrievalMode::Unavailable {
            return Retrieval {
                candidates: Vec::new(),
                mode,
                query_entities,
            };
        }

        let mut candidates: Vec<RetrievalCandidate> = rows
            .into_iter()
            .filter_map(|(id, row)| self.score_candidate(id, row, &query_entities, mode))
            .collect();

        candidates.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.semantic_score
                        .partial_cmp(&a.semantic_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                // Id order carries no meaning; it only pins determinism.
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });
        candidates.truncate(top_k);

        Retrieval {
            candidates,
            mode,
            query_entities,
        }
    }

    async fn search_dense(
        &self,
        query: &str,
        fetch: usize,
        deadline: Duration,
    ) -> Result<Vec<incident_core::VectorHit>, RagError> {
        let work = async {
            let embedding = self
                .embedder
                .embed(query)
                .await
                .map_err(|e| RagError::Embedding(e.to_string()))?;
            self.vector
                .query(&embedding, fetch, None)
                .await
                .map_err(|e| RagError::Search(e.to_string()))
        };

        tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| RagError::Timeout(format!("dense path exceeded {deadline:?}")))?
    }

    /// Fuse one score row and apply the priority boost.
    fn score_candidate(
        &self,
        id: String,
        row: ScoreRow,
        query_entities: &EntitySet,
        mode: RetrievalMode,
    ) -> Option<RetrievalCandidate> {
        // Drop candidates that raced with a delete; a cited id must always
        // resolve against the canonical store.
        let incident = self.reader.get(&id)?;
        let candidate_entities = self.extractor.extract(&incident.entity_text());

        let matched_merchants: Vec<String> = query_entities
            .merchants
            .iter()
            .filter(|m| candidate_entities.merchants.contains(*m))
            .cloned()
            .collect();
        let matched_gateways: Vec<String> = query_entities
            .gateways
            .iter()
            .filter(|g| candidate_entities.gateways.contains(*g))
            .cloned()
            .collect();

        let match_type = match (!matched_merchants.is_empty(), !matched_gateways.is_empty()) {
            (true, true) => MatchType::PerfectMerchantGatewayMatch,
            (true, false) => MatchType::MerchantIdMatch,
            (false, true) => MatchType::PaymentGatewayMatch,
            (false, false) => MatchType::SemanticMatch,
        };

        let base = base_fusion(row.semantic, row.bm25, row.tfidf);
        let fused = (base * match_type.multiplier()).min(match_type.cap());

        Some(RetrievalCandidate {
            incident_id: id,
            semantic_score: row.semantic,
            bm25_score: row.bm25,
            tfidf_score: row.tfidf,
            fused_score: fused,
            match_type: match_type.label(mode.is_degraded()),
            priority_details: PriorityDetails {
                query_entities: query_entities.clone(),
                matched_merchants,
                matched_gateways,
                boost: match_type.multiplier(),
                cap: match_type.cap(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use incident_core::{Incident, MetadataFilter, Result, VectorHit};
    use incident_index::SparseDoc;
    use std::collections::HashMap as StdHashMap;

    use crate::embedding::HashedEmbedder;
    use crate::vector::InMemoryIndex;

    const DIM: usize = 256;

    fn incident(id: &str, title: &str, description: &str) -> Incident {
        Incident {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            resolution: "Restarted the connector pool and replayed the failed batch.".into(),
            tags: vec!["payments".into()],
            created_at: Utc::now(),
            resolved_by: "oncall@example.com".into(),
            category: None,
            priority: None,
        }
    }

    struct MapReader(StdHashMap<String, Incident>);

    impl IncidentReader for MapReader {
        fn get(&self, id: &str) -> Option<Incident> {
            self.0.get(id).cloned()
        }
        fn contains(&self, id: &str) -> bool {
            self.0.contains_key(id)
        }
        fn all_ids(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
        fn tag_vocabulary(&self) -> Vec<String> {
            Vec::new()
        }
    }

    /// Vector index that always errors, for degraded-path tests.
    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn upsert(
            &self,
            _id: &str,
            _vector: &[f32],
            _metadata: StdHashMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<MetadataFilter>,
        ) -> Result<Vec<VectorHit>> {
            Err(incident_core::Error::Transient("vector index timeout".into()))
        }
    }

    async fn build_retriever(
        incidents: Vec<Incident>,
        vector: Arc<dyn VectorIndex>,
    ) -> HybridRetriever {
        let embedder = Arc::new(HashedEmbedder::new(DIM));
        let sparse = Arc::new(SparseIndex::new());

        let docs: Vec<SparseDoc> = incidents
            .iter()
            .map(|i| SparseDoc {
                id: i.id.clone(),
                text: i.training_text(),
            })
            .collect();
        sparse.rebuild(docs);

        for i in &incidents {
            let vec = embedder.embed_sync(&i.training_text());
            vector
                .upsert(&i.id, &vec, StdHashMap::new())
                .await
                .unwrap();
        }

        let reader = Arc::new(MapReader(
            incidents.into_iter().map(|i| (i.id.clone(), i)).collect(),
        ));

        HybridRetriever::new(
            embedder,
            vector,
            sparse,
            Arc::new(EntityExtractor::default()),
            reader,
            RetrieverConfig::default(),
        )
    }

    fn corpus() -> Vec<Incident> {
        vec![
            incident(
                "JSP-1000",
                "UPI timeout on Axis Bank",
                "UPI collect requests against Axis Bank started timing out after the deploy, \
                 retries piling up in the queue.",
            ),
            incident(
                "JSP-1005",
                "Axis PG connection reset",
                "The Axis payment gateway dropped idle connections causing intermittent resets \
                 during checkout.",
            ),
            incident(
                "JSP-1020",
                "Snapdeal refunds stuck at Pinelabs",
                "Refund webhooks for Snapdeal orders routed through Pinelabs were stuck pending \
                 for over six hours.",
            ),
        ]
    }

    #[tokio::test]
    async fn test_full_mode_ranks_lexical_match_first() {
        let retriever =
            build_retriever(corpus(), Arc::new(InMemoryIndex::new(DIM))).await;

        let retrieval = retriever
            .retrieve("UPI timeout", 3, Duration::from_secs(5))
            .await;

        assert_eq!(retrieval.mode, RetrievalMode::Full);
        assert_eq!(retrieval.candidates[0].incident_id, "JSP-1000");
        assert!(retrieval.candidates[0].fused_score > 0.3);
        assert_eq!(retrieval.candidates[0].match_type, "SEMANTIC_MATCH");
    }

    #[tokio::test]
    async fn test_priority_boost_beats_semantic_neighbour() {
        let retriever =
            build_retriever(corpus(), Arc::new(InMemoryIndex::new(DIM))).await;

        // Entity-bearing query: JSP-1020 names both Snapdeal and Pinelabs.
        let retrieval = retriever
            .retrieve(
                "Snapdeal payment failing at Pinelabs gateway timeout",
                3,
                Duration::from_secs(5),
            )
            .await;

        let top = &retrieval.candidates[0];
        assert_eq!(top.incident_id, "JSP-1020");
        assert_eq!(top.match_type, "PERFECT_MERCHANT_GATEWAY_MATCH");
        assert_eq!(top.priority_details.matched_merchants, vec!["snapdeal"]);
        assert_eq!(top.priority_details.matched_gateways, vec!["pinelabs"]);
        assert!((top.priority_details.boost - 2.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_boost_respects_cap() {
        let retriever =
            build_retriever(corpus(), Arc::new(InMemoryIndex::new(DIM))).await;

        let retrieval = retriever
            .retrieve(
                "Snapdeal refunds stuck at Pinelabs webhooks pending",
                3,
                Duration::from_secs(5),
            )
            .await;

        for candidate in &retrieval.candidates {
            assert!(candidate.fused_score <= 1.0);
        }
        assert!((retrieval.candidates[0].fused_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_degraded_sparse_only() {
        let retriever = build_retriever(corpus(), Arc::new(BrokenIndex)).await;

        let retrieval = retriever
            .retrieve("UPI timeout", 3, Duration::from_secs(5))
            .await;

        assert_eq!(retrieval.mode, RetrievalMode::SparseOnly);
        assert!(retrieval.mode.is_degraded());
        assert!(!retrieval.candidates.is_empty());
        assert_eq!(retrieval.candidates[0].incident_id, "JSP-1000");
        assert!(retrieval.candidates[0]
            .match_type
            .ends_with("_DEGRADED"));
        assert_eq!(retrieval.candidates[0].semantic_score, 0.0);
    }

    #[tokio::test]
    async fn test_deterministic_ordering() {
        let retriever =
            build_retriever(corpus(), Arc::new(InMemoryIndex::new(DIM))).await;

        let first = retriever
            .retrieve("Axis gateway issues", 3, Duration::from_secs(5))
            .await;
        let second = retriever
            .retrieve("Axis gateway issues", 3, Duration::from_secs(5))
            .await;

        let ids = |r: &Retrieval| {
            r.candidates
                .iter()
                .map(|c| c.incident_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }
}
