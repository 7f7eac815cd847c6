//! Generator backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use incident_core::{extract_incident_id, Generator, Result};

use crate::LlmError;

/// Configuration for the OpenAI-compatible chat backend.
#[derive(Debug, Clone)]
pub struct HttpGeneratorConfig {
    /// Base URL up to and including `/v1`.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    /// Kept low so answers are reproducible against a fixed corpus.
    pub temperature: f32,
    pub timeout: Duration,
    /// Retry attempts for transient failures.
    pub max_retries: u32,
    /// Initial backoff; doubles each retry.
    pub initial_backoff: Duration,
}

impl Default for HttpGeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "qwen2.5:7b-instruct-q4_K_M".to_string(),
            max_tokens: 512,
            temperature: 0.1,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// OpenAI-compatible chat-completions client.
pub struct HttpGenerator {
    client: Client,
    config: HttpGeneratorConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl HttpGenerator {
    pub fn new(config: HttpGeneratorConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn execute(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => LlmError::RateLimited(body),
                s if (500..600).contains(&s) => {
                    LlmError::Network(format!("server error {s}: {body}"))
                }
                _ => LlmError::Api(body),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response carried no choices".into()))
    }
}

impl HttpGenerator {
    fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::Network(_) | LlmError::Timeout | LlmError::RateLimited(_)
        )
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    /// Generate with retry for transient failures.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "generation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Network("retries exhausted".into()))
            .into())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Deterministic generator for tests and offline deployments.
///
/// Produces a fixed-shape answer citing the first incident id found in the
/// prompt context, and counts invocations so tests can assert that refusal
/// paths never consult the provider.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match extract_incident_id(prompt) {
            Some(id) => Ok(format!(
                "Based on the retrieved incidents, the closest resolved case is [{id}]. \
                 Apply the resolution recorded there and verify the affected flow recovers."
            )),
            None => Ok(
                "The provided incidents do not contain enough evidence to answer this."
                    .to_string(),
            ),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
