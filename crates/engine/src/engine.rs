//! The per-request pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use incident_core::{
    ConfidenceLevel, Incident, IncidentReader, PriorityDetails, QueryComplexity, QueryRequest,
    RagResponse, RagStrategy, RefusalReason, ResponseMetadata, ResponseStatus, RetrievalCandidate,
    Result,
};
use incident_corpus::CorpusManager;
use incident_llm::{sanitize_query, SanitizedQuery};
use incident_rag::{HybridRetriever, QueryRouter, RouterDecision, SemanticValidator};

use crate::grounded::{cited_sources, GroundedAnswerer};

/// Match label for the direct-lookup strategy, outside the retrieval boost
/// table.
const EXACT_MATCH_LABEL: &str = "EXACT_ID_MATCH";

/// Full confidence is reserved for direct id lookups; hybrid answers are
/// clamped just below it.
const MAX_HYBRID_CONFIDENCE: f32 = 0.99;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-request deadline, inherited by the sub-retrievals.
    pub deadline: Duration,
    /// Confidence multiplier and ceiling under degraded retrieval.
    pub degraded_confidence_factor: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            degraded_confidence_factor: 0.6,
        }
    }
}

/// The query-answering pipeline: router, retriever, validator, generator.
pub struct RagEngine {
    corpus: Arc<CorpusManager>,
    router: QueryRouter,
    retriever: HybridRetriever,
    validator: SemanticValidator,
    answerer: GroundedAnswerer,
    config: EngineConfig,
}

impl RagEngine {
    pub fn new(
        corpus: Arc<CorpusManager>,
        router: QueryRouter,
        retriever: HybridRetriever,
        validator: SemanticValidator,
        answerer: GroundedAnswerer,
        config: EngineConfig,
    ) -> Self {
        Self {
            corpus,
            router,
            retriever,
            validator,
            answerer,
            config,
        }
    }

    /// Re-harvest router anchors from the corpus tags. Call after ingest.
    pub fn refresh_anchors(&self) {
        self.router.refresh_anchors();
    }

    /// Answer one query. Refusals and degraded answers are successful
    /// responses; only input faults and internal errors return `Err`.
    pub async fn answer(&self, request: QueryRequest) -> Result<RagResponse> {
        let started = Instant::now();
        let correlation_id = Uuid::new_v4().to_string();

        let query = sanitize_query(&request.query)?;
        let decision = self.router.classify(&query.sanitized);

        tracing::info!(
            %correlation_id,
            complexity = ?decision.complexity,
            top_k = decision.top_k,
            "query classified"
        );

        let response = match decision.complexity {
            QueryComplexity::ExactId => {
                let id = decision.exact_id.clone().unwrap_or_default();
                self.exact_lookup(&query, &id, started, &correlation_id)
            }
            QueryComplexity::OutOfDomain => Ok(self.refusal(
                &query,
                QueryComplexity::OutOfDomain,
                RefusalReason::OutOfDomain,
                started,
                &correlation_id,
            )),
            _ => {
                self.hybrid(&query, &request, decision, started, &correlation_id)
                    .await
            }
        }?;

        tracing::info!(
            %correlation_id,
            strategy = ?response.rag_strategy,
            status = ?response.metadata.status,
            confidence = response.confidence_score,
            elapsed_ms = response.execution_time_ms,
            "query answered"
        );
        Ok(response)
    }

    /// Direct lookup: bypasses retrieval and validation entirely, and never
    /// consults the generative provider.
    fn exact_lookup(
        &self,
        query: &SanitizedQuery,
        id: &str,
        started: Instant,
        correlation_id: &str,
    ) -> Result<RagResponse> {
        let Some(incident) = self.corpus.get(id) else {
            // The id vanished between classification and lookup.
            return Ok(self.refusal(
                query,
                QueryComplexity::ExactId,
                RefusalReason::NoCandidates,
                started,
                correlation_id,
            ));
        };

        let answer = format_incident(&incident);
        let candidate = RetrievalCandidate {
            incident_id: incident.id.clone(),
            semantic_score: 1.0,
            bm25_score: 1.0,
            tfidf_score: 1.0,
            fused_score: 1.0,
            match_type: EXACT_MATCH_LABEL.to_string(),
            priority_details: PriorityDetails::default(),
        };

        Ok(RagResponse {
            query: query.raw.clone(),
            generated_answer: answer,
            retrieved_incidents: vec![candidate],
            sources: vec![incident.id],
            confidence_score: 1.0,
            query_complexity: QueryComplexity::ExactId,
            execution_time_ms: started.elapsed().as_millis() as u64,
            rag_strategy: RagStrategy::ExactIdLookup,
            metadata: ResponseMetadata {
                confidence_level: ConfidenceLevel::High,
                incidents_retrieved: 1,
                status: ResponseStatus::Ok,
                refusal_reason: None,
                correlation_id: correlation_id.to_string(),
            },
        })
    }

    async fn hybrid(
        &self,
        query: &SanitizedQuery,
        request: &QueryRequest,
        decision: RouterDecision,
        started: Instant,
        correlation_id: &str,
    ) -> Result<RagResponse> {
        let complexity = decision.complexity;
        // max_incidents is an upper bound; the router may request fewer.
        let top_k = decision.top_k.min(request.max_incidents.max(1));
        // The router derives the floor per complexity class; a request may
        // override it.
        let floor = request
            .confidence_threshold
            .unwrap_or(decision.confidence_floor)
            .clamp(0.0, 1.0);

        let retrieval = self
            .retriever
            .retrieve(&query.sanitized, top_k, self.config.deadline)
            .await;

        if retrieval.candidates.is_empty() {
            return Ok(self.refusal(
                query,
                complexity,
                RefusalReason::NoCandidates,
                started,
                correlation_id,
            ));
        }

        let validation = self
            .validator
            .validate(&query.sanitized, &retrieval.candidates, floor);
        if !validation.admitted {
            return Ok(self.refusal(
                query,
                complexity,
                validation
                    .reason
                    .unwrap_or(RefusalReason::InsufficientSemanticOverlap),
                started,
                correlation_id,
            ));
        }

        let incidents: Vec<Incident> = retrieval
            .candidates
            .iter()
            .filter_map(|c| self.corpus.get(&c.incident_id))
            .collect();
        if incidents.is_empty() {
            // Every candidate raced with a delete.
            return Ok(self.refusal(
                query,
                complexity,
                RefusalReason::NoCandidates,
                started,
                correlation_id,
            ));
        }

        let degraded = retrieval.mode.is_degraded();
        let (answer, generation_degraded) =
            match self.answerer.answer(query, &incidents).await {
                Ok(answer) => (answer, false),
                Err(e) if e.is_retryable() => {
                    // Provider exhausted its retries: degrade to a templated
                    // answer from the best incident instead of refusing
                    // admitted evidence.
                    tracing::warn!(%correlation_id, error = %e, "generation unavailable, templating from top incident");
                    (format_incident(&incidents[0]), true)
                }
                Err(e) => return Err(e),
            };

        let retrieved_ids: Vec<String> = retrieval
            .candidates
            .iter()
            .map(|c| c.incident_id.clone())
            .collect();
        let sources = if request.include_sources {
            cited_sources(&answer, &retrieved_ids)
        } else {
            Vec::new()
        };

        let factor = if degraded || generation_degraded {
            self.config.degraded_confidence_factor
        } else {
            1.0
        };
        let confidence = (validation.top_fused.min(validation.best_composite) * factor)
            .clamp(0.0, MAX_HYBRID_CONFIDENCE);

        let status = if degraded || generation_degraded {
            ResponseStatus::Degraded
        } else {
            ResponseStatus::Ok
        };

        Ok(RagResponse {
            query: query.raw.clone(),
            generated_answer: answer,
            sources,
            confidence_score: confidence,
            query_complexity: complexity,
            execution_time_ms: started.elapsed().as_millis() as u64,
            rag_strategy: RagStrategy::HybridRag,
            metadata: ResponseMetadata {
                confidence_level: ConfidenceLevel::from_score(confidence),
                incidents_retrieved: retrieval.candidates.len(),
                status,
                refusal_reason: None,
                correlation_id: correlation_id.to_string(),
            },
            retrieved_incidents: retrieval.candidates,
        })
    }

    /// A refusal is a first-class answer: no sources, zero confidence, and
    /// no call to the generative provider.
    fn refusal(
        &self,
        query: &SanitizedQuery,
        complexity: QueryComplexity,
        reason: RefusalReason,
        started: Instant,
        correlation_id: &str,
    ) -> RagResponse {
        let answer = match reason {
            RefusalReason::OutOfDomain => {
                "This question is outside the incident knowledge base, so no grounded \
                 answer can be given."
            }
            RefusalReason::NoCandidates => {
                "No relevant incidents were found for this query."
            }
            RefusalReason::InsufficientSemanticOverlap => {
                "The retrieved incidents do not overlap enough with this query to support \
                 a grounded answer."
            }
        };

        RagResponse {
            query: query.raw.clone(),
            generated_answer: answer.to_string(),
            retrieved_incidents: Vec::new(),
            sources: Vec::new(),
            confidence_score: 0.0,
            query_complexity: complexity,
            execution_time_ms: started.elapsed().as_millis() as u64,
            rag_strategy: RagStrategy::Refusal,
            metadata: ResponseMetadata {
                confidence_level: ConfidenceLevel::Low,
                incidents_retrieved: 0,
                status: ResponseStatus::Refused,
                refusal_reason: Some(reason),
                correlation_id: correlation_id.to_string(),
            },
        }
    }
}

/// Deterministic rendering of a single incident, used by the exact-lookup
/// strategy and as the degraded-generation fallback.
fn format_incident(incident: &Incident) -> String {
    format!(
        "{id} — {title}\n\nProblem: {description}\n\nResolution: {resolution}\n\n\
         Resolved by {resolved_by}. Tags: {tags}.",
        id = incident.id,
        title = incident.title,
        description = incident.description,
        resolution = incident.resolution,
        resolved_by = incident.resolved_by,
        tags = incident.tags.join(", "),
    )
}
