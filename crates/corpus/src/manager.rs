//! Corpus manager: canonical store plus index synchronisation.
//!
//! Mutation order per record: embed, upsert into the vector index, publish a
//! sparse snapshot containing the record, then insert into the canonical
//! map. A reader that observes an id through `all_ids()` therefore also
//! observes it in both indices. Deletes run the other way round. The sparse
//! index is derived state and can always be rebuilt from the canonical map
//! after a crash.

use std::collections::HashMap;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use incident_core::{
    Embedder, Error, Incident, IncidentReader, MetadataFilter, Result, VectorIndex,
};
use incident_index::{SparseDoc, SparseIndex};

use crate::CorpusError;

const METADATA_SECTION_LEN: usize = 500;

/// Result of an orphan sweep across the two indices.
#[derive(Debug, Default)]
pub struct AuditReport {
    pub checked: usize,
    pub missing_dense: Vec<String>,
    pub missing_sparse: Vec<String>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_dense.is_empty() && self.missing_sparse.is_empty()
    }
}

/// Owner of the canonical incident store.
pub struct CorpusManager {
    records: DashMap<String, Incident>,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    sparse: Arc<SparseIndex>,
    /// Serialises mutations; readers never take it.
    write_lock: Mutex<()>,
}

impl CorpusManager {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        sparse: Arc<SparseIndex>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            embedder,
            vector,
            sparse,
            write_lock: Mutex::new(()),
        }
    }

    pub fn sparse(&self) -> Arc<SparseIndex> {
        Arc::clone(&self.sparse)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Admit a new incident. Duplicate ids are rejected; the id is immutable
    /// from here on.
    pub async fn add(&self, incident: Incident) -> Result<()> {
        incident.validate()?;
        let _guard = self.write_lock.lock().await;

        if self.records.contains_key(&incident.id) {
            return Err(CorpusError::DuplicateId(incident.id).into());
        }

        self.publish(incident).await
    }

    /// Replace an existing incident. The embedding is recomputed from the
    /// new training text (the cache absorbs no-op updates).
    pub async fn update(&self, incident: Incident) -> Result<()> {
        incident.validate()?;
        let _guard = self.write_lock.lock().await;

        if !self.records.contains_key(&incident.id) {
            return Err(CorpusError::UnknownId(incident.id).into());
        }

        self.publish(incident).await
    }

    /// Tombstone an incident: gone from the canonical map first, then from
    /// both indices.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.records.remove(id).is_none() {
            return Err(CorpusError::UnknownId(id.to_string()).into());
        }

        self.vector.delete(id).await?;
        self.sparse.remove(id);
        tracing::info!(incident_id = %id, "incident removed from corpus");
        Ok(())
    }

    /// Two-phase publish; caller holds the write lock.
    async fn publish(&self, incident: Incident) -> Result<()> {
        let training_text = incident.training_text();
        let embedding = self.embedder.embed(&training_text).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(Error::Internal(format!(
                "embedder produced dimension {}, expected {}",
                embedding.len(),
                self.embedder.dimension()
            )));
        }

        self.vector
            .upsert(&incident.id, &embedding, Self::metadata_map(&incident))
            .await?;

        self.sparse.upsert(SparseDoc {
            id: incident.id.clone(),
            text: training_text,
        });

        tracing::debug!(incident_id = %incident.id, "incident published to both indices");
        self.records.insert(incident.id.clone(), incident);
        Ok(())
    }

    /// Metadata stored alongside the vector.
    pub fn metadata_map(incident: &Incident) -> HashMap<String, String> {
        fn clip(text: &str) -> String {
            if text.len() <= METADATA_SECTION_LEN {
                return text.to_string();
            }
            let mut end = METADATA_SECTION_LEN;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        }

        let mut metadata = HashMap::new();
        metadata.insert("id".to_string(), incident.id.clone());
        metadata.insert("title".to_string(), incident.title.clone());
        metadata.insert("description".to_string(), clip(&incident.description));
        metadata.insert("resolution".to_string(), clip(&incident.resolution));
        metadata.insert("tags".to_string(), incident.tags.join(","));
        metadata.insert("created_at".to_string(), incident.created_at.to_rfc3339());
        metadata.insert("resolved_by".to_string(), incident.resolved_by.clone());
        if let Some(category) = incident.category {
            metadata.insert("category".to_string(), category.as_str().to_string());
        }
        if let Some(priority) = incident.priority {
            metadata.insert("priority".to_string(), priority.as_str().to_string());
        }
        metadata
    }

    /// Rebuild the sparse index from the canonical store. Recovery path for
    /// a crash between vector upsert and snapshot publication.
    pub fn rebuild_sparse(&self) {
        let docs: Vec<SparseDoc> = self
            .records
            .iter()
            .map(|entry| SparseDoc {
                id: entry.key().clone(),
                text: entry.value().training_text(),
            })
            .collect();
        tracing::info!(docs = docs.len(), "rebuilding sparse index from canonical store");
        self.sparse.rebuild(docs);
    }

    /// Sweep for orphans between the canonical store and the two indices.
    pub async fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for entry in self.records.iter() {
            report.checked += 1;
            let id = entry.key().clone();

            if !self.sparse.contains(&id) {
                report.missing_sparse.push(id.clone());
            }

            // Membership probe through the narrow query interface: the
            // record's own embedding filtered to its id must come back.
            let embedding = self.embedder.embed(&entry.value().training_text()).await?;
            let hits = self
                .vector
                .query(&embedding, 1, Some(MetadataFilter::eq("id", id.clone())))
                .await?;
            if hits.is_empty() {
                report.missing_dense.push(id);
            }
        }

        report.missing_dense.sort();
        report.missing_sparse.sort();
        Ok(report)
    }
}

impl IncidentReader for CorpusManager {
    fn get(&self, id: &str) -> Option<Incident> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn tag_vocabulary(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .records
            .iter()
            .flat_map(|e| e.value().tags.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use incident_rag::{HashedEmbedder, InMemoryIndex};

    const DIM: usize = 128;

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.into(),
            title: "UPI timeout on Axis Bank".into(),
            description: "UPI collect requests against Axis Bank started timing out after the \
                          deploy, retries piling up."
                .into(),
            resolution: "Rolled back the connector and drained the retry queue.".into(),
            tags: vec!["UPI".into(), "timeout".into()],
            created_at: Utc::now(),
            resolved_by: "oncall@example.com".into(),
            category: None,
            priority: None,
        }
    }

    fn manager() -> CorpusManager {
        CorpusManager::new(
            Arc::new(HashedEmbedder::new(DIM)),
            Arc::new(InMemoryIndex::new(DIM)),
            Arc::new(SparseIndex::new()),
        )
    }

    #[tokio::test]
    async fn test_add_get_roundtrip() {
        let manager = manager();
        let record = incident("JSP-1000");
        manager.add(record.clone()).await.unwrap();

        assert_eq!(manager.get("JSP-1000"), Some(record));
        assert_eq!(manager.all_ids(), vec!["JSP-1000".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();

        let result = manager.add(incident("JSP-1000")).await;
        assert!(matches!(result, Err(Error::Schema(_))));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_record_touches_nothing() {
        let manager = manager();
        let mut bad = incident("JSP-1000");
        bad.description = "too short".into();

        assert!(manager.add(bad).await.is_err());
        assert!(manager.is_empty());
        assert!(manager.sparse().is_empty());
    }

    #[tokio::test]
    async fn test_visible_id_is_in_both_indices() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();
        manager.add(incident("JSP-1001")).await.unwrap();

        let audit = manager.audit().await.unwrap();
        assert_eq!(audit.checked, 2);
        assert!(audit.is_consistent());
    }

    #[tokio::test]
    async fn test_update_reindexes() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();

        let mut updated = incident("JSP-1000");
        updated.title = "Settlement webhook backlog".into();
        updated.description = "Settlement confirmation webhooks queued up behind a slow \
                               consumer and breached the delivery SLO."
            .into();
        manager.update(updated).await.unwrap();

        assert_eq!(
            manager.get("JSP-1000").unwrap().title,
            "Settlement webhook backlog"
        );
        let hits = manager.sparse().search_bm25("settlement webhook", 5);
        assert_eq!(hits[0].id, "JSP-1000");
    }

    #[tokio::test]
    async fn test_update_unknown_id_rejected() {
        let manager = manager();
        assert!(manager.update(incident("JSP-9999")).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();
        manager.delete("JSP-1000").await.unwrap();

        assert!(manager.get("JSP-1000").is_none());
        assert!(!manager.sparse().contains("JSP-1000"));
        let audit = manager.audit().await.unwrap();
        assert_eq!(audit.checked, 0);
    }

    #[tokio::test]
    async fn test_rebuild_sparse_from_canonical() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();

        // Simulate losing the derived index.
        manager.sparse().rebuild(Vec::new());
        assert!(manager.sparse().is_empty());

        manager.rebuild_sparse();
        assert!(manager.sparse().contains("JSP-1000"));
        assert!(manager.audit().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_metadata_map_keys() {
        let record = incident("JSP-1000");
        let metadata = CorpusManager::metadata_map(&record);

        for key in ["id", "title", "description", "resolution", "tags", "created_at", "resolved_by"] {
            assert!(metadata.contains_key(key), "missing key {key}");
        }
        assert_eq!(metadata["tags"], "UPI,timeout");
    }

    #[tokio::test]
    async fn test_tag_vocabulary_lowercased_distinct() {
        let manager = manager();
        manager.add(incident("JSP-1000")).await.unwrap();
        manager.add(incident("JSP-1001")).await.unwrap();

        assert_eq!(manager.tag_vocabulary(), vec!["timeout".to_string(), "upi".to_string()]);
    }
}
