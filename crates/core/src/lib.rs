//! Core domain types for HealthGuard
//!
//! This crate defines the fundamental data structures used throughout
//! the application: Documents and the Corpus, Chunks, clinical Findings,
//! retrieval results, Citations and Diagnosis items.

pub mod document;
pub mod corpus;
pub mod chunk;
pub mod finding;
pub mod diagnosis;
pub mod error;

pub use document::{Document, DocumentMeta, DocumentRecord};
pub use corpus::{load_corpus, Corpus};
pub use chunk::{chunk_corpus, chunk_document, Chunk, ChunkConfig};
pub use finding::{Finding, FindingCategory, FindingEntry};
pub use diagnosis::{Citation, Confidence, DiagnosisItem, RetrievalResult};
pub use error::{CoreError, Result};
