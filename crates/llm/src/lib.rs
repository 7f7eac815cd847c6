//! Grounded prompt construction and generative provider backends.
//!
//! The prompt is typed data with named slots rather than string interpolation
//! at call sites, so injection sanitisation lives in one place. Backends
//! implement the narrow `Generator` trait: an OpenAI-compatible HTTP client
//! for production and a deterministic scripted generator for tests.

pub mod backend;
pub mod prompt;

pub use backend::{HttpGenerator, HttpGeneratorConfig, ScriptedGenerator};
pub use prompt::{sanitize_query, ContextBlock, GroundedPrompt, SanitizedQuery};

use thiserror::Error;

/// Generation errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for incident_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(msg) => incident_core::Error::RateLimited(msg),
            LlmError::Network(msg) => incident_core::Error::Transient(msg),
            LlmError::Timeout => incident_core::Error::Transient("generation timed out".into()),
            other => incident_core::Error::Generation(other.to_string()),
        }
    }
}
