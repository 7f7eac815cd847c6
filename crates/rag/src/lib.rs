//! Hybrid retrieval for incident intelligence
//!
//! Features:
//! - Dense vector search via Qdrant or an in-process cosine index
//! - Sparse BM25 + TF-IDF search over the same corpus
//! - Weighted score fusion with entity-driven priority boosts
//! - Rule-based query routing (exact-id / simple / complex / out-of-domain)
//! - Semantic validation gating what reaches the generator
//! - Content-addressed embedding cache with per-key single-flight
//! - Token-bucket rate limiting and retry with exponential backoff

pub mod cache;
pub mod embedding;
pub mod entities;
pub mod fusion;
pub mod limiter;
pub mod retriever;
pub mod retry;
pub mod router;
pub mod validator;
pub mod vector;

pub use cache::{CacheStats, CachedEmbedder};
pub use embedding::{GeminiEmbedder, GeminiEmbedderConfig, HashedEmbedder};
pub use entities::{EntityExtractor, EntityVocabulary};
pub use fusion::{base_fusion, BM25_WEIGHT, SEMANTIC_WEIGHT, TFIDF_WEIGHT};
pub use limiter::TokenBucket;
pub use retriever::{
    HybridRetriever, Retrieval, RetrievalMode, RetrieverConfig,
};
pub use retry::{with_backoff, RetryPolicy};
pub use router::{QueryRouter, RouterDecision};
pub use validator::{SemanticValidator, Validation, ValidatorConfig};
pub use vector::{InMemoryIndex, QdrantIndex, QdrantIndexConfig};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl RagError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::RateLimited(_) | RagError::Timeout(_) | RagError::Connection(_)
        )
    }
}

impl From<RagError> for incident_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::QuotaExhausted(msg) => incident_core::Error::EmbeddingUnavailable(msg),
            RagError::RateLimited(msg) => incident_core::Error::RateLimited(msg),
            RagError::Timeout(msg) | RagError::Connection(msg) => {
                incident_core::Error::Transient(msg)
            }
            RagError::InvalidInput(msg) => incident_core::Error::Input(msg),
            other => incident_core::Error::Retrieval(other.to_string()),
        }
    }
}
