//! Generative provider contract.

use async_trait::async_trait;

use crate::Result;

/// Produces text conditioned on a rendered prompt.
///
/// Implementations:
/// - `HttpGenerator` - OpenAI-compatible chat endpoint at low temperature
/// - `ScriptedGenerator` - deterministic canned output with a call counter
///
/// The engine never hands a generator the bare query: prompts are rendered
/// from the typed grounded template so sanitisation lives in one place.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Generate a completion for the rendered prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model name for logging.
    fn model_name(&self) -> &str;
}
