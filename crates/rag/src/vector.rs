//! Vector index backends.
//!
//! `QdrantIndex` adapts an external Qdrant collection; `InMemoryIndex` is an
//! in-process cosine scan used as the default backend and as the test fake.
//! Both speak the narrow [`VectorIndex`] contract.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldCondition,
    Filter, Match, PointId, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use incident_core::{MetadataFilter, Result, VectorHit, VectorIndex};

use crate::RagError;

/// Qdrant connection configuration.
#[derive(Debug, Clone)]
pub struct QdrantIndexConfig {
    pub endpoint: String,
    pub collection: String,
    pub dimension: usize,
    pub api_key: Option<String>,
}

/// Qdrant-backed vector index.
///
/// Qdrant point ids must be integers or UUIDs, so incident ids are mapped to
/// deterministic v5 UUIDs and the original id travels in the payload.
pub struct QdrantIndex {
    client: Qdrant,
    config: QdrantIndexConfig,
}

impl QdrantIndex {
    pub async fn connect(config: QdrantIndexConfig) -> std::result::Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        let index = Self { client, config };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> std::result::Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorIndex(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorIndex(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "created Qdrant collection");
        }

        Ok(())
    }

    fn point_id(incident_id: &str) -> PointId {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, incident_id.as_bytes())
            .to_string()
            .into()
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("id".to_string(), id.to_string().into());
        for (k, v) in metadata {
            payload.insert(k, v.into());
        }

        let point = PointStruct::new(Self::point_id(id), vector.to_vec(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, vec![point]))
            .await
            .map_err(|e| RagError::VectorIndex(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection).points(PointsIdsList {
                    ids: vec![Self::point_id(id)],
                }),
            )
            .await
            .map_err(|e| RagError::VectorIndex(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        let mut builder = SearchPointsBuilder::new(
            &self.config.collection,
            vector.to_vec(),
            top_k as u64,
        )
        .with_payload(true);

        if let Some(f) = filter {
            builder = builder.filter(Filter {
                must: vec![Condition {
                    condition_one_of: Some(
                        qdrant_client::qdrant::condition::ConditionOneOf::Field(FieldCondition {
                            key: f.field,
                            r#match: Some(Match {
                                match_value: Some(
                                    qdrant_client::qdrant::r#match::MatchValue::Keyword(f.value),
                                ),
                            }),
                            ..Default::default()
                        }),
                    ),
                }],
                ..Default::default()
            });
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .map(|point| {
                let mut metadata = HashMap::new();
                let mut id = String::new();

                for (k, v) in point.payload {
                    if let Some(Kind::StringValue(s)) = v.kind {
                        if k == "id" {
                            id = s.clone();
                        }
                        metadata.insert(k, s);
                    }
                }

                VectorHit {
                    id,
                    score: point.score,
                    metadata,
                }
            })
            .collect();

        Ok(hits)
    }
}

/// In-process cosine index.
pub struct InMemoryIndex {
    dimension: usize,
    points: DashMap<String, (Vec<f32>, HashMap<String, String>)>,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.points.contains_key(id)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::VectorIndex(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            ))
            .into());
        }
        self.points
            .insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.points.remove(id);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = self
            .points
            .iter()
            .filter(|entry| match &filter {
                Some(f) => entry.value().1.get(&f.field) == Some(&f.value),
                None => true,
            })
            .map(|entry| {
                let (stored, metadata) = entry.value();
                let score: f32 = stored.iter().zip(vector).map(|(a, b)| a * b).sum();
                VectorHit {
                    id: entry.key().clone(),
                    score,
                    metadata: metadata.clone(),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Vec<f32> {
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let index = InMemoryIndex::new(3);
        index
            .upsert("JSP-1", &unit(&[1.0, 0.0, 0.0]), HashMap::new())
            .await
            .unwrap();
        index
            .upsert("JSP-2", &unit(&[0.0, 1.0, 0.0]), HashMap::new())
            .await
            .unwrap();

        let hits = index.query(&unit(&[1.0, 0.1, 0.0]), 2, None).await.unwrap();
        assert_eq!(hits[0].id, "JSP-1");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_in_memory_dimension_check() {
        let index = InMemoryIndex::new(3);
        let result = index.upsert("JSP-1", &[1.0, 0.0], HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_filter() {
        let index = InMemoryIndex::new(2);
        let mut payments = HashMap::new();
        payments.insert("category".to_string(), "payment".to_string());
        let mut refunds = HashMap::new();
        refunds.insert("category".to_string(), "refund".to_string());

        index.upsert("JSP-1", &unit(&[1.0, 0.0]), payments).await.unwrap();
        index.upsert("JSP-2", &unit(&[1.0, 0.0]), refunds).await.unwrap();

        let hits = index
            .query(
                &unit(&[1.0, 0.0]),
                10,
                Some(MetadataFilter::eq("category", "refund")),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "JSP-2");
    }

    #[tokio::test]
    async fn test_delete_absent_id_is_ok() {
        let index = InMemoryIndex::new(2);
        assert!(index.delete("JSP-404").await.is_ok());
    }

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(
            QdrantIndex::point_id("JSP-1234"),
            QdrantIndex::point_id("JSP-1234")
        );
        assert_ne!(
            QdrantIndex::point_id("JSP-1234"),
            QdrantIndex::point_id("JSP-1235")
        );
    }
}
