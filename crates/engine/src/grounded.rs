//! Grounded answer generation.
//!
//! Builds the citation-bearing context from admitted incidents, guards the
//! generative provider with the token bucket, and extracts the cited sources
//! from the returned text.

use std::sync::Arc;

use incident_core::{Generator, Incident, Result, INCIDENT_ID_RE};
use incident_llm::{GroundedPrompt, SanitizedQuery};
use incident_rag::TokenBucket;

/// Wraps the generative provider for the hybrid path.
pub struct GroundedAnswerer {
    generator: Arc<dyn Generator>,
    limiter: Arc<TokenBucket>,
}

impl GroundedAnswerer {
    pub fn new(generator: Arc<dyn Generator>, limiter: Arc<TokenBucket>) -> Self {
        Self { generator, limiter }
    }

    /// Generate an answer grounded only in `incidents`, ordered best first.
    pub async fn answer(
        &self,
        query: &SanitizedQuery,
        incidents: &[Incident],
    ) -> Result<String> {
        let mut prompt = GroundedPrompt::new(query);
        for incident in incidents {
            prompt.push_incident(incident);
        }
        let rendered = prompt.render();

        self.limiter.acquire().await.map_err(incident_core::Error::from)?;
        self.generator.generate(&rendered).await
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }
}

/// Incident ids cited in an answer, restricted to the retrieved set and
/// ordered by retrieval rank.
pub fn cited_sources(answer: &str, retrieved: &[String]) -> Vec<String> {
    let mut cited: Vec<String> = INCIDENT_ID_RE
        .find_iter(answer)
        .map(|m| m.as_str().to_uppercase())
        .collect();
    cited.sort();
    cited.dedup();

    retrieved
        .iter()
        .filter(|id| cited.contains(*id))
        .cloned()
        .collect()
}
