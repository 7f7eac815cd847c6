//! Error taxonomy shared across all crates.
//!
//! Every error carries a stable `kind()` code so transports can map it to a
//! status without matching on message text. Refusals are *not* errors: a
//! refused query is a successful response with `rag_strategy = refusal`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or oversize caller input. Never reaches retrieval.
    #[error("invalid input: {0}")]
    Input(String),

    /// Incident record failed schema validation. Never touches the indices.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Provider pushed back; retried with backoff before surfacing.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Embedding provider quota exhausted; not retryable.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Transient remote failure (timeout, connection reset, 5xx).
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("corpus error: {0}")]
    Corpus(String),

    /// Invariant violation. The only class surfaced as a 5xx.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for transports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Input(_) => "input",
            Error::Schema(_) => "schema",
            Error::RateLimited(_) => "rate_limited",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::Transient(_) => "transient",
            Error::Config(_) => "config",
            Error::Retrieval(_) => "retrieval",
            Error::Generation(_) => "generation",
            Error::Corpus(_) => "corpus",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Transient(_))
    }
}
