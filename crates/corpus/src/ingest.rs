//! Ingestion pipeline: heterogeneous sources to live incidents.
//!
//! Each record walks a small state machine:
//! `new -> validated -> normalised -> embedded -> upserted -> indexed -> live`;
//! any stage may divert to `quarantined` (terminal). Ingestion is idempotent
//! on id: re-ingesting identical content is a no-op, changed content becomes
//! an update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use incident_core::{Category, Error, Incident, IncidentReader, Priority, Result};

use crate::manager::CorpusManager;
use crate::CorpusError;

/// Lifecycle stage of one record during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    New,
    Validated,
    Normalised,
    Embedded,
    Upserted,
    Indexed,
    Live,
    Quarantined,
}

/// A record that failed some stage, with the stage it died in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub id: Option<String>,
    pub failed_at: IngestStage,
    pub reason: String,
}

/// Outcome of one source batch.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    /// Newly admitted records.
    pub admitted: usize,
    /// Existing records whose content changed and was re-published.
    pub updated: usize,
    /// Identical re-ingests; no index was touched.
    pub unchanged: usize,
    pub quarantined: Vec<QuarantinedRecord>,
}

impl IngestReport {
    pub fn live(&self) -> usize {
        self.admitted + self.updated + self.unchanged
    }
}

/// An incident as it appears in an external source, before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIncident {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub resolved_by: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Caller-supplied mapping from incident field names to CSV column headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvMapping {
    pub columns: HashMap<String, String>,
    /// Separator for multi-valued tag cells.
    #[serde(default = "default_tag_separator")]
    pub tag_separator: char,
}

fn default_tag_separator() -> char {
    ';'
}

/// A chat thread about a production problem, normalised into an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,
    /// Marks the message that states the fix.
    #[serde(default)]
    pub marks_resolution: bool,
}

/// One batch from one source.
#[derive(Debug, Clone)]
pub enum IngestSource {
    Records(Vec<RawIncident>),
    /// JSON array of raw incidents (ticket export format).
    Json(String),
    Csv {
        data: String,
        mapping: CsvMapping,
    },
    Chat(Vec<ChatThread>),
}

/// Normalises sources into incidents and drives them through the corpus.
pub struct IngestionPipeline {
    corpus: Arc<CorpusManager>,
}

impl IngestionPipeline {
    pub fn new(corpus: Arc<CorpusManager>) -> Self {
        Self { corpus }
    }

    /// Ingest one source batch. Records are processed in order; a failure
    /// quarantines that record and never blocks the rest of the batch.
    pub async fn ingest(&self, source: IngestSource) -> Result<IngestReport> {
        let raws = self.load(source)?;
        let mut report = IngestReport {
            received: raws.len(),
            ..Default::default()
        };

        for raw in raws {
            let id_hint = (!raw.id.trim().is_empty()).then(|| raw.id.trim().to_uppercase());
            match self.ingest_record(raw).await {
                Ok(RecordOutcome::Admitted) => report.admitted += 1,
                Ok(RecordOutcome::Updated) => report.updated += 1,
                Ok(RecordOutcome::Unchanged) => report.unchanged += 1,
                Err((failed_at, reason)) => {
                    tracing::warn!(
                        incident_id = id_hint.as_deref().unwrap_or("<missing>"),
                        stage = ?failed_at,
                        %reason,
                        "record quarantined"
                    );
                    report.quarantined.push(QuarantinedRecord {
                        id: id_hint,
                        failed_at,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            received = report.received,
            admitted = report.admitted,
            updated = report.updated,
            unchanged = report.unchanged,
            quarantined = report.quarantined.len(),
            "ingest batch complete"
        );
        Ok(report)
    }

    fn load(&self, source: IngestSource) -> Result<Vec<RawIncident>> {
        match source {
            IngestSource::Records(raws) => Ok(raws),
            IngestSource::Json(data) => serde_json::from_str(&data)
                .map_err(|e| CorpusError::SourceParse(format!("JSON export: {e}")).into()),
            IngestSource::Csv { data, mapping } => parse_csv(&data, &mapping),
            IngestSource::Chat(threads) => {
                Ok(threads.into_iter().map(thread_to_raw).collect())
            }
        }
    }

    async fn ingest_record(
        &self,
        raw: RawIncident,
    ) -> std::result::Result<RecordOutcome, (IngestStage, String)> {
        // validate: field presence and parseability.
        let created_at = validate_raw(&raw).map_err(|e| (IngestStage::Validated, e))?;

        // normalise: canonical field shapes.
        let incident = normalise(raw, created_at);
        incident
            .validate()
            .map_err(|e| (IngestStage::Normalised, e.to_string()))?;

        // Idempotence on id: identical content is a no-op, different content
        // is an update.
        if let Some(existing) = self.corpus.get(&incident.id) {
            if existing == incident {
                return Ok(RecordOutcome::Unchanged);
            }
            return self
                .corpus
                .update(incident)
                .await
                .map(|_| RecordOutcome::Updated)
                .map_err(|e| (stage_of(&e), e.to_string()));
        }

        self.corpus
            .add(incident)
            .await
            .map(|_| RecordOutcome::Admitted)
            .map_err(|e| (stage_of(&e), e.to_string()))
    }
}

enum RecordOutcome {
    Admitted,
    Updated,
    Unchanged,
}

/// Attribute a corpus failure to the pipeline stage it happened in.
fn stage_of(error: &Error) -> IngestStage {
    match error {
        Error::Schema(_) | Error::Input(_) => IngestStage::Normalised,
        Error::EmbeddingUnavailable(_) | Error::RateLimited(_) | Error::Transient(_) => {
            IngestStage::Embedded
        }
        Error::Retrieval(_) => IngestStage::Upserted,
        _ => IngestStage::Indexed,
    }
}

fn validate_raw(raw: &RawIncident) -> std::result::Result<DateTime<Utc>, String> {
    if raw.id.trim().is_empty() {
        return Err("missing id".into());
    }
    if raw.title.trim().is_empty() {
        return Err("missing title".into());
    }
    if raw.description.trim().is_empty() {
        return Err("missing description".into());
    }
    if raw.resolution.trim().is_empty() {
        return Err("missing resolution".into());
    }
    match &raw.created_at {
        None => Err("missing created_at".into()),
        Some(value) => parse_timestamp(value)
            .ok_or_else(|| format!("unparseable created_at {value:?}")),
    }
}

/// RFC 3339 first, then bare dates (midnight UTC).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value.trim()) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn normalise(raw: RawIncident, created_at: DateTime<Utc>) -> Incident {
    let mut tags: Vec<String> = raw
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();

    Incident {
        id: raw.id.trim().to_uppercase(),
        title: raw.title.trim().to_string(),
        description: raw.description.trim().to_string(),
        resolution: raw.resolution.trim().to_string(),
        tags,
        created_at,
        resolved_by: raw.resolved_by.trim().to_lowercase(),
        category: raw.category,
        priority: raw.priority,
    }
}

fn parse_csv(data: &str, mapping: &CsvMapping) -> Result<Vec<RawIncident>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| CorpusError::SourceParse(format!("CSV headers: {e}")))?
        .clone();

    let column_index = |field: &str| -> Option<usize> {
        mapping
            .columns
            .get(field)
            .and_then(|column| headers.iter().position(|h| h == column))
    };

    let id_col = column_index("id");
    let title_col = column_index("title");
    let description_col = column_index("description");
    let resolution_col = column_index("resolution");
    let tags_col = column_index("tags");
    let created_col = column_index("created_at");
    let resolved_col = column_index("resolved_by");
    let category_col = column_index("category");
    let priority_col = column_index("priority");

    let mut raws = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| CorpusError::SourceParse(format!("CSV row: {e}")))?;
        let cell = |idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i)).unwrap_or("").to_string()
        };

        let tags = {
            let cell = cell(tags_col);
            cell.split(mapping.tag_separator)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        };

        raws.push(RawIncident {
            id: cell(id_col),
            title: cell(title_col),
            description: cell(description_col),
            resolution: cell(resolution_col),
            tags,
            created_at: {
                let value = cell(created_col);
                (!value.is_empty()).then_some(value)
            },
            resolved_by: cell(resolved_col),
            category: parse_enum(&cell(category_col)),
            priority: parse_enum(&cell(priority_col)),
        });
    }

    Ok(raws)
}

/// Parse a lowercase enum cell through its serde representation.
fn parse_enum<T: serde::de::DeserializeOwned>(cell: &str) -> Option<T> {
    let trimmed = cell.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_value(serde_json::Value::String(trimmed)).ok()
}

/// Collapse a chat thread: topic becomes the title, the discussion the
/// description, and resolution-marked messages the fix.
fn thread_to_raw(thread: ChatThread) -> RawIncident {
    let description = thread
        .messages
        .iter()
        .filter(|m| !m.marks_resolution)
        .map(|m| format!("{}: {}", m.author, m.body))
        .collect::<Vec<_>>()
        .join("\n");

    let resolution = thread
        .messages
        .iter()
        .filter(|m| m.marks_resolution)
        .map(|m| m.body.clone())
        .collect::<Vec<_>>()
        .join(" ");

    let resolved_by = thread
        .messages
        .iter()
        .rev()
        .find(|m| m.marks_resolution)
        .map(|m| m.author.clone())
        .unwrap_or_default();

    let created_at = thread
        .messages
        .iter()
        .map(|m| m.posted_at)
        .min()
        .map(|t| t.to_rfc3339());

    RawIncident {
        id: thread.id,
        title: thread.topic,
        description,
        resolution,
        tags: thread.tags,
        created_at,
        resolved_by,
        category: None,
        priority: None,
    }
}
