//! Core types and capability traits for the incident-intelligence engine.
//!
//! This crate provides the foundations used across all other crates:
//! - The incident data model and schema validation
//! - Query classification, retrieval candidate and response types
//! - Error taxonomy with stable kind codes
//! - Capability traits for pluggable providers (embedding, vector index,
//!   generation) and the read-side corpus view

pub mod error;
pub mod incident;
pub mod query;
pub mod traits;

pub use error::{Error, Result};
pub use incident::{
    extract_incident_id, Category, Feedback, FeedbackSubmission, Incident, Priority,
    INCIDENT_ID_RE,
};
pub use query::{
    ConfidenceLevel, EntitySet, MatchType, PriorityDetails, QueryComplexity, QueryRequest,
    RagResponse, RagStrategy, RefusalReason, ResponseMetadata, ResponseStatus, RetrievalCandidate,
};
pub use traits::{
    Embedder, Generator, IncidentReader, MetadataFilter, VectorHit, VectorIndex,
};
