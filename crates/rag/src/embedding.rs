//! Embedding providers.
//!
//! `GeminiEmbedder` talks to the hosted `embedContent` API; `HashedEmbedder`
//! produces deterministic hashed-feature vectors with no network, used by
//! tests and keyless deployments. Both enforce unit L2 norm so cosine scores
//! stay comparable across providers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use incident_core::{Embedder, Result};
use incident_index::tokenize;

use crate::limiter::TokenBucket;
use crate::retry::{with_backoff, RetryPolicy};
use crate::RagError;

/// Scale a vector to unit L2 norm in place. Zero vectors stay zero.
pub(crate) fn l2_normalise(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Configuration for the hosted embedding client.
#[derive(Debug, Clone)]
pub struct GeminiEmbedderConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub task_type: String,
    pub timeout: Duration,
}

impl Default for GeminiEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            model: "text-embedding-004".to_string(),
            dimension: 768,
            task_type: "retrieval_document".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Hosted `embedContent` client. Calls go through the shared token bucket
/// when one is attached, and transient failures are retried with exponential
/// backoff before surfacing.
pub struct GeminiEmbedder {
    client: Client,
    config: GeminiEmbedderConfig,
    retry: RetryPolicy,
    limiter: Option<Arc<TokenBucket>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    content: ContentParts<'a>,
    task_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ContentParts<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiEmbedderConfig) -> std::result::Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            retry: RetryPolicy::default(),
            limiter: None,
        })
    }

    /// Guard outbound calls with a shared token bucket.
    pub fn with_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn execute(&self, text: &str) -> std::result::Result<Vec<f32>, RagError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.config.endpoint, self.config.model, self.config.api_key
        );

        let request = EmbedContentRequest {
            content: ContentParts {
                parts: vec![TextPart { text }],
            },
            task_type: &self.config.task_type,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Timeout(format!("embed request timed out: {e}"))
                } else {
                    RagError::Connection(format!("embed request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => RagError::RateLimited(format!("embedding provider: {body}")),
                403 => RagError::QuotaExhausted(format!("embedding provider: {body}")),
                400 => RagError::InvalidInput(format!("embedding provider: {body}")),
                s if (500..600).contains(&s) => {
                    RagError::Connection(format!("embedding provider {s}: {body}"))
                }
                s => RagError::Embedding(format!("embedding provider {s}: {body}")),
            });
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("malformed embed response: {e}")))?;

        let mut vector = parsed.embedding.values;
        if vector.len() != self.config.dimension {
            return Err(RagError::Embedding(format!(
                "provider returned dimension {}, expected {}",
                vector.len(),
                self.config.dimension
            )));
        }
        l2_normalise(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(ref limiter) = self.limiter {
            limiter.acquire().await?;
        }
        Ok(with_backoff(self.retry, |_| self.execute(text)).await?)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

/// Deterministic offline embedder.
///
/// Tokens are hashed into buckets with term-frequency weights; the result is
/// l2-normalised, so texts sharing vocabulary land near each other in cosine
/// space. Good enough to exercise the full pipeline without a provider.
pub struct HashedEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hashed-{dimension}"),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        l2_normalise(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
