//! Canonical incident store and the pipelines that feed it.
//!
//! The corpus manager owns the incident records and keeps the dense and
//! sparse indices consistent through a two-phase publish; the ingestion
//! pipeline normalises heterogeneous sources into the incident schema; the
//! feedback sink records ratings append-only.

pub mod feedback;
pub mod ingest;
pub mod manager;

pub use feedback::FeedbackSink;
pub use ingest::{
    ChatMessage, ChatThread, CsvMapping, IngestReport, IngestSource, IngestStage,
    IngestionPipeline, QuarantinedRecord, RawIncident,
};
pub use manager::{AuditReport, CorpusManager};

use thiserror::Error;

/// Corpus errors
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Duplicate incident id: {0}")]
    DuplicateId(String),

    #[error("Unknown incident id: {0}")]
    UnknownId(String),

    #[error("Source parse error: {0}")]
    SourceParse(String),
}

impl From<CorpusError> for incident_core::Error {
    fn from(err: CorpusError) -> Self {
        match err {
            CorpusError::DuplicateId(id) => {
                incident_core::Error::Schema(format!("duplicate incident id {id}"))
            }
            CorpusError::UnknownId(id) => {
                incident_core::Error::Corpus(format!("unknown incident id {id}"))
            }
            CorpusError::SourceParse(msg) => incident_core::Error::Input(msg),
        }
    }
}
