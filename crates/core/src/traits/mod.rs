//! Capability traits at the seams of the engine.
//!
//! External providers (embedding, vector index, generation) are consumed
//! through these narrow interfaces; production shims and test fakes both
//! implement them.

pub mod embedder;
pub mod generator;
pub mod reader;
pub mod vector_index;

pub use embedder::Embedder;
pub use generator::Generator;
pub use reader::IncidentReader;
pub use vector_index::{MetadataFilter, VectorHit, VectorIndex};
