//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use incident_config::Settings;
use incident_corpus::{CorpusManager, FeedbackSink, IngestionPipeline};
use incident_engine::RagEngine;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<RagEngine>,
    pub corpus: Arc<CorpusManager>,
    pub ingest: Arc<IngestionPipeline>,
    pub feedback: Arc<FeedbackSink>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        engine: Arc<RagEngine>,
        corpus: Arc<CorpusManager>,
    ) -> Self {
        let ingest = Arc::new(IngestionPipeline::new(Arc::clone(&corpus)));
        Self {
            settings: Arc::new(settings),
            engine,
            corpus,
            ingest,
            feedback: Arc::new(FeedbackSink::new()),
        }
    }
}
