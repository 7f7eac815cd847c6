//! In-process sparse retrieval: Okapi BM25 and TF-IDF over one corpus.
//!
//! Both structures are built from the same training text through one shared
//! tokeniser (lowercase, punctuation stripped, no stemming) and published as
//! immutable snapshots behind a pointer swap, so readers never observe a
//! half-built index.

pub mod bm25;
pub mod snapshot;
pub mod tfidf;
pub mod tokenize;

pub use bm25::{Bm25Index, Bm25Params};
pub use snapshot::{SparseDoc, SparseHit, SparseIndex, SparseSnapshot};
pub use tfidf::TfidfMatrix;
pub use tokenize::{ngrams, tokenize, tokenize_filtered, STOP_WORDS};
