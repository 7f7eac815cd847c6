//! End-to-end pipeline scenarios against in-process providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use incident_core::{
    Embedder, Generator, Incident, IncidentReader, MetadataFilter, QueryComplexity, QueryRequest,
    RagStrategy, RefusalReason, ResponseStatus, Result, VectorHit, VectorIndex,
};
use incident_corpus::CorpusManager;
use incident_engine::{EngineConfig, GroundedAnswerer, RagEngine};
use incident_index::SparseIndex;
use incident_llm::ScriptedGenerator;
use incident_rag::{
    CachedEmbedder, EntityExtractor, HashedEmbedder, HybridRetriever, InMemoryIndex, QueryRouter,
    RetrieverConfig, SemanticValidator, TokenBucket, ValidatorConfig,
};

const DIM: usize = 256;

struct Harness {
    corpus: Arc<CorpusManager>,
    generator: Arc<ScriptedGenerator>,
    engine: RagEngine,
}

fn incident(id: &str, title: &str, description: &str, tags: &[&str]) -> Incident {
    Incident {
        id: id.into(),
        title: title.into(),
        description: description.into(),
        resolution: "Rolled back the faulty connector release and replayed the stuck batch."
            .into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: Utc::now(),
        resolved_by: "oncall@example.com".into(),
        category: None,
        priority: None,
    }
}

fn seed_incidents() -> Vec<Incident> {
    vec![
        incident(
            "JSP-1052",
            "Webhook SSL failure",
            "Webhook deliveries started failing the TLS handshake after the certificate \
             rotation on the notification fleet.",
            &["webhook", "ssl"],
        ),
        incident(
            "JSP-1000",
            "UPI timeout on Axis Bank",
            "UPI collect requests against Axis Bank started timing out after the evening \
             deploy, retries piling up in the queue.",
            &["upi", "timeout"],
        ),
        incident(
            "JSP-1005",
            "Axis PG connection reset",
            "The Axis payment gateway dropped idle connections which caused intermittent \
             resets during checkout traffic peaks.",
            &["gateway", "connection"],
        ),
        incident(
            "JSP-1020",
            "Snapdeal captures failing at Pinelabs",
            "Capture calls for Snapdeal orders routed through Pinelabs returned declines \
             after the routing switch, failing most captures.",
            &["capture", "decline"],
        ),
        incident(
            "JSP-1030",
            "Flipkart captures failing at Razorpay",
            "Capture calls for Flipkart orders routed through Razorpay returned declines \
             after the routing switch, failing most captures.",
            &["capture", "decline"],
        ),
    ]
}

async fn harness_with_vector(vector: Arc<dyn VectorIndex>, config: EngineConfig) -> Harness {
    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
        Arc::new(HashedEmbedder::new(DIM)),
        Duration::from_secs(3600),
    ));
    let sparse = Arc::new(SparseIndex::new());
    let corpus = Arc::new(CorpusManager::new(
        Arc::clone(&embedder),
        Arc::clone(&vector),
        Arc::clone(&sparse),
    ));

    for record in seed_incidents() {
        corpus.add(record).await.unwrap();
    }

    let reader: Arc<dyn IncidentReader> = corpus.clone();
    let extractor = Arc::new(EntityExtractor::default());

    let router = QueryRouter::new(Arc::clone(&reader), Arc::clone(&extractor));
    let retriever = HybridRetriever::new(
        embedder,
        vector,
        sparse,
        Arc::clone(&extractor),
        Arc::clone(&reader),
        RetrieverConfig::default(),
    );
    let validator = SemanticValidator::new(reader, extractor, ValidatorConfig::default());

    let generator = Arc::new(ScriptedGenerator::new());
    let answerer = GroundedAnswerer::new(
        Arc::clone(&generator) as Arc<dyn Generator>,
        Arc::new(TokenBucket::unlimited()),
    );

    let engine = RagEngine::new(corpus.clone(), router, retriever, validator, answerer, config);

    Harness {
        corpus,
        generator,
        engine,
    }
}

async fn harness() -> Harness {
    harness_with_vector(Arc::new(InMemoryIndex::new(DIM)), EngineConfig::default()).await
}

/// Vector index whose queries always fail, simulating a timed-out provider.
struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(
        &self,
        _id: &str,
        _vector: &[f32],
        _metadata: HashMap<String, String>,
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
        Err(incident_core::Error::Transient(
            "vector index request timed out".into(),
        ))
    }
}

/// Vector index that answers long after any sane deadline.
struct SlowIndex;

#[async_trait]
impl VectorIndex for SlowIndex {
    async fn upsert(
        &self,
        _id: &str,
        _vector: &[f32],
        _metadata: HashMap<String, String>,
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
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

// Scenario 1: exact-id short-circuit.
#[tokio::test]
async fn exact_id_short_circuit() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("JSP-1052"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::ExactIdLookup);
    assert_eq!(response.confidence_score, 1.0);
    assert_eq!(response.sources, vec!["JSP-1052".to_string()]);
    assert_eq!(response.query_complexity, QueryComplexity::ExactId);
    assert!(response.generated_answer.contains("Webhook SSL failure"));
    assert_eq!(harness.generator.call_count(), 0);
}

// Scenario 2: exact id embedded in prose.
#[tokio::test]
async fn exact_id_inside_prose() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("any update on JSP-1052 please"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::ExactIdLookup);
    assert_eq!(response.confidence_score, 1.0);
    assert_eq!(response.sources, vec!["JSP-1052".to_string()]);
    assert_eq!(harness.generator.call_count(), 0);
}

// Scenario 3: simple domain query retrieves, validates and cites.
#[tokio::test]
async fn simple_domain_query() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("UPI timeout"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::HybridRag);
    assert_eq!(response.query_complexity, QueryComplexity::Simple);
    assert_eq!(response.metadata.status, ResponseStatus::Ok);
    assert!(response.retrieved_incidents.len() <= 3);
    assert_eq!(response.retrieved_incidents[0].incident_id, "JSP-1000");
    assert_eq!(response.sources, vec!["JSP-1000".to_string()]);
    assert_eq!(harness.generator.call_count(), 1);
}

// Scenario 4: merchant+gateway priority boost dominates semantic neighbours.
#[tokio::test]
async fn priority_boost_dominates() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new(
            "Snapdeal captures failing at Pinelabs",
        ))
        .await
        .unwrap();

    let top = &response.retrieved_incidents[0];
    assert_eq!(top.incident_id, "JSP-1020");
    assert_eq!(top.match_type, "PERFECT_MERCHANT_GATEWAY_MATCH");
    assert!((top.fused_score - 1.0).abs() < 1e-6, "boost should reach the cap");

    // The textual twin with mismatched entities ranks strictly below.
    let twin_rank = response
        .retrieved_incidents
        .iter()
        .position(|c| c.incident_id == "JSP-1030");
    if let Some(rank) = twin_rank {
        assert!(rank > 0);
        assert!(response.retrieved_incidents[rank].fused_score < top.fused_score);
    }
}

// Scenario 5: out-of-domain refusal without touching the generator.
#[tokio::test]
async fn refusal_out_of_domain() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("how to bake a cake"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::Refusal);
    assert_eq!(response.confidence_score, 0.0);
    assert!(response.sources.is_empty());
    assert_eq!(response.query_complexity, QueryComplexity::OutOfDomain);
    assert_eq!(response.metadata.status, ResponseStatus::Refused);
    assert_eq!(
        response.metadata.refusal_reason,
        Some(RefusalReason::OutOfDomain)
    );
    assert_eq!(harness.generator.call_count(), 0);
}

// Scenario 6: dense path down, sparse-only degraded answer.
#[tokio::test]
async fn degraded_retrieval() {
    let harness =
        harness_with_vector(Arc::new(FailingIndex), EngineConfig::default()).await;

    let response = harness
        .engine
        .answer(QueryRequest::new("UPI timeout"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::HybridRag);
    assert_eq!(response.metadata.status, ResponseStatus::Degraded);
    assert!(response.confidence_score <= 0.6);
    assert!(!response.retrieved_incidents.is_empty());
    for candidate in &response.retrieved_incidents {
        assert!(candidate.match_type.ends_with("_DEGRADED"));
        assert_eq!(candidate.semantic_score, 0.0);
    }
}

// A weak hybrid score is carried end to end by the composite branch: no seed
// document shares a token with this query, so both sparse paths come back
// empty and the fused score stays far below the floor, yet the shared
// payments theme and troubleshooting intent admit the set.
#[tokio::test]
async fn weak_fused_admitted_on_composite_relevance() {
    let harness = harness().await;

    let mut request = QueryRequest::new("why are mandate debits blocked");
    request.max_incidents = 5;
    let response = harness.engine.answer(request).await.unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::HybridRag);
    assert_eq!(response.metadata.status, ResponseStatus::Ok);
    assert!(!response.retrieved_incidents.is_empty());
    assert!(
        response.retrieved_incidents[0].fused_score < 0.3,
        "scenario requires a sub-floor fused score, got {}",
        response.retrieved_incidents[0].fused_score
    );
    assert!(response.confidence_score < 0.3);
    assert_eq!(harness.generator.call_count(), 1);
}

// A request-level threshold raises the admission bar above what the
// evidence supports.
#[tokio::test]
async fn request_threshold_overrides_router_floor() {
    let harness = harness().await;

    let mut request = QueryRequest::new("UPI timeout");
    request.confidence_threshold = Some(0.95);
    let response = harness.engine.answer(request).await.unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::Refusal);
    assert_eq!(
        response.metadata.refusal_reason,
        Some(RefusalReason::InsufficientSemanticOverlap)
    );
    assert!(response.sources.is_empty());
    assert_eq!(harness.generator.call_count(), 0);
}

// A dense path that exceeds the deadline degrades the same way.
#[tokio::test]
async fn deadline_drops_slow_dense_path() {
    let config = EngineConfig {
        deadline: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let harness = harness_with_vector(Arc::new(SlowIndex), config).await;

    let response = harness
        .engine
        .answer(QueryRequest::new("UPI timeout"))
        .await
        .unwrap();

    assert_eq!(response.metadata.status, ResponseStatus::Degraded);
    assert!(response.confidence_score <= 0.6);
}

// I3: full confidence implies the exact-id strategy.
#[tokio::test]
async fn hybrid_confidence_stays_below_one() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("Snapdeal captures failing at Pinelabs"))
        .await
        .unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::HybridRag);
    assert!(response.confidence_score < 1.0);
}

// I1: every cited source resolves against the canonical store.
#[tokio::test]
async fn sources_resolve_in_corpus() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new("Axis gateway connection resets"))
        .await
        .unwrap();

    for source in &response.sources {
        assert!(harness.corpus.get(source).is_some());
    }
    for source in &response.sources {
        assert!(response
            .retrieved_incidents
            .iter()
            .any(|c| &c.incident_id == source));
    }
}

// I5: identical query, unchanged corpus, deterministic provider.
#[tokio::test]
async fn repeated_query_is_deterministic() {
    let harness = harness().await;

    let first = harness
        .engine
        .answer(QueryRequest::new("Axis gateway connection resets"))
        .await
        .unwrap();
    let second = harness
        .engine
        .answer(QueryRequest::new("Axis gateway connection resets"))
        .await
        .unwrap();

    let ids = |r: &incident_core::RagResponse| {
        r.retrieved_incidents
            .iter()
            .map(|c| c.incident_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.confidence_score, second.confidence_score);
    assert_eq!(first.generated_answer, second.generated_answer);
}

// Complex phrasing widens the candidate budget.
#[tokio::test]
async fn complex_query_classification() {
    let harness = harness().await;

    let response = harness
        .engine
        .answer(QueryRequest::new(
            "why do captures keep failing across gateways",
        ))
        .await
        .unwrap();

    assert_eq!(response.query_complexity, QueryComplexity::Complex);
}

// max_incidents is an upper bound on the router's budget.
#[tokio::test]
async fn max_incidents_caps_retrieval() {
    let harness = harness().await;

    let mut request = QueryRequest::new("why do captures keep failing across gateways");
    request.max_incidents = 2;
    let response = harness.engine.answer(request).await.unwrap();

    assert!(response.retrieved_incidents.len() <= 2);
}

// include_sources=false suppresses citations but not grounding.
#[tokio::test]
async fn sources_can_be_suppressed() {
    let harness = harness().await;

    let mut request = QueryRequest::new("UPI timeout");
    request.include_sources = false;
    let response = harness.engine.answer(request).await.unwrap();

    assert_eq!(response.rag_strategy, RagStrategy::HybridRag);
    assert!(response.sources.is_empty());
}

// Input faults never reach retrieval.
#[tokio::test]
async fn oversize_query_rejected() {
    let harness = harness().await;

    let result = harness
        .engine
        .answer(QueryRequest::new("x".repeat(5000)))
        .await;

    assert!(matches!(result, Err(incident_core::Error::Input(_))));
    assert_eq!(harness.generator.call_count(), 0);
}

// The raw query is echoed for audit even after sanitisation.
#[tokio::test]
async fn response_echoes_raw_query() {
    let harness = harness().await;

    let raw = "UPI timeout   please";
    let response = harness.engine.answer(QueryRequest::new(raw)).await.unwrap();
    assert_eq!(response.query, raw);
}
