//! Embedding provider contract.

use async_trait::async_trait;

use crate::Result;

/// Maps text to a unit-norm dense vector of fixed dimension.
///
/// Implementations:
/// - `GeminiEmbedder` - hosted `embedContent` API
/// - `HashedEmbedder` - deterministic offline hashed features
/// - `CachedEmbedder` - content-addressed cache wrapping either
///
/// The dimension is fixed at corpus build time; changing it requires a full
/// re-embed of the corpus.
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    /// Embed a single text. The returned vector has `dimension()` components
    /// and unit L2 norm, and is deterministic for a given text under caching.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed output dimension.
    fn dimension(&self) -> usize;

    /// Model identifier, part of the cache key.
    fn model_id(&self) -> &str;
}
