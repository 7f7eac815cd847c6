//! Vector index contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A nearest-neighbour hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

/// Equality filter over a metadata field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Nearest-neighbour search over fixed-dimension vectors with metadata.
///
/// Implementations:
/// - `QdrantIndex` - external Qdrant collection
/// - `InMemoryIndex` - in-process cosine scan (default backend and test fake)
#[async_trait]
pub trait VectorIndex: Send + Sync + 'static {
    /// Insert or replace the vector and metadata stored under `id`.
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Remove `id`. Deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Top-k by cosine similarity, optionally filtered on metadata equality.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<VectorHit>>;
}
