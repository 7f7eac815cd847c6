//! Query classification, retrieval candidates and the response envelope.

use serde::{Deserialize, Serialize};

/// Query complexity assigned by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    ExactId,
    Simple,
    Complex,
    OutOfDomain,
}

impl QueryComplexity {
    /// How many candidates the retriever should return for this class.
    pub fn top_k(&self) -> usize {
        match self {
            QueryComplexity::ExactId => 1,
            QueryComplexity::Simple => 3,
            QueryComplexity::Complex => 8,
            QueryComplexity::OutOfDomain => 0,
        }
    }

    /// Admission floor derived for this class, applied during validation
    /// unless the request overrides it.
    pub fn confidence_floor(&self) -> f32 {
        match self {
            QueryComplexity::ExactId => 0.1,
            _ => 0.3,
        }
    }
}

/// Strategy the engine used to produce the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagStrategy {
    ExactIdLookup,
    HybridRag,
    Refusal,
}

/// Why a query was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    NoCandidates,
    InsufficientSemanticOverlap,
    OutOfDomain,
}

/// Response status surfaced in the metadata envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Refused,
    Degraded,
}

/// Confidence bucket: `<0.3` low, `<0.7` medium, else high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f32) -> Self {
        if score < 0.3 {
            ConfidenceLevel::Low
        } else if score < 0.7 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        }
    }
}

/// How a candidate earned its rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    PerfectMerchantGatewayMatch,
    MerchantIdMatch,
    PaymentGatewayMatch,
    SemanticMatch,
}

impl MatchType {
    /// Multiplicative boost applied on top of the fused base score.
    pub fn multiplier(&self) -> f32 {
        match self {
            MatchType::PerfectMerchantGatewayMatch => 2.5,
            MatchType::MerchantIdMatch => 2.0,
            MatchType::PaymentGatewayMatch => 1.5,
            MatchType::SemanticMatch => 1.0,
        }
    }

    /// Ceiling the boosted score is clamped to.
    pub fn cap(&self) -> f32 {
        match self {
            MatchType::PerfectMerchantGatewayMatch => 1.0,
            MatchType::MerchantIdMatch => 0.95,
            MatchType::PaymentGatewayMatch => 0.85,
            MatchType::SemanticMatch => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::PerfectMerchantGatewayMatch => "PERFECT_MERCHANT_GATEWAY_MATCH",
            MatchType::MerchantIdMatch => "MERCHANT_ID_MATCH",
            MatchType::PaymentGatewayMatch => "PAYMENT_GATEWAY_MATCH",
            MatchType::SemanticMatch => "SEMANTIC_MATCH",
        }
    }

    /// Wire label, suffixed when the retrieval ran in degraded mode.
    pub fn label(&self, degraded: bool) -> String {
        if degraded {
            format!("{}_DEGRADED", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

/// Entities extracted from a query or an incident.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    pub merchants: Vec<String>,
    pub gateways: Vec<String>,
    pub banks: Vec<String>,
    pub error_codes: Vec<String>,
}

impl EntitySet {
    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty()
            && self.gateways.is_empty()
            && self.banks.is_empty()
            && self.error_codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.merchants.len() + self.gateways.len() + self.banks.len() + self.error_codes.len()
    }

    /// Count of entities shared with `other`, across all kinds.
    pub fn overlap(&self, other: &EntitySet) -> usize {
        fn shared(a: &[String], b: &[String]) -> usize {
            a.iter().filter(|x| b.contains(*x)).count()
        }
        shared(&self.merchants, &other.merchants)
            + shared(&self.gateways, &other.gateways)
            + shared(&self.banks, &other.banks)
            + shared(&self.error_codes, &other.error_codes)
    }
}

/// Structured diff of the entities behind a priority boost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityDetails {
    pub query_entities: EntitySet,
    pub matched_merchants: Vec<String>,
    pub matched_gateways: Vec<String>,
    pub boost: f32,
    pub cap: f32,
}

/// A ranked candidate emitted by the hybrid retriever.
///
/// `fused_score` is the authoritative ranking score; the sub-scores are
/// reported for transparency. All scores are in `[0, 1]` (BM25 is min-max
/// normalised within the batch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub incident_id: String,
    pub semantic_score: f32,
    pub bm25_score: f32,
    pub tfidf_score: f32,
    pub fused_score: f32,
    pub match_type: String,
    pub priority_details: PriorityDetails,
}

/// Caller request to the query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_include_sources")]
    pub include_sources: bool,
    /// Upper bound on retrieved incidents; the router may request fewer.
    #[serde(default = "default_max_incidents")]
    pub max_incidents: usize,
    /// Overrides the router-derived confidence floor when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
}

fn default_include_sources() -> bool {
    true
}
fn default_max_incidents() -> usize {
    3
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_sources: default_include_sources(),
            max_incidents: default_max_incidents(),
            confidence_threshold: None,
        }
    }
}

/// Metadata envelope attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub confidence_level: ConfidenceLevel,
    pub incidents_retrieved: usize,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<RefusalReason>,
    pub correlation_id: String,
}

/// The grounded answer returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub query: String,
    pub generated_answer: String,
    /// Ordered by fused score, best first.
    pub retrieved_incidents: Vec<RetrievalCandidate>,
    /// Incident ids cited in the answer; always a subset of retrieved.
    pub sources: Vec<String>,
    pub confidence_score: f32,
    pub query_complexity: QueryComplexity,
    pub execution_time_ms: u64,
    pub rag_strategy: RagStrategy,
    pub metadata: ResponseMetadata,
}
