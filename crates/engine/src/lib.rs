//! Request orchestration for the incident-intelligence engine.
//!
//! One request runs strictly `classify -> retrieve -> validate -> generate`;
//! only the three sub-retrievals inside the retriever are unordered with
//! respect to one another. Refusals are values, not errors.

pub mod engine;
pub mod grounded;

pub use engine::{EngineConfig, RagEngine};
pub use grounded::GroundedAnswerer;
