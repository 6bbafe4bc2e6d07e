//! Embedding index for HealthGuard
//!
//! Holds chunk embeddings for one corpus build and answers top-k cosine
//! similarity queries. Built indexes are immutable; [`SharedIndex`] publishes
//! rebuilds atomically to concurrent readers.

pub mod embedding;
pub mod error;
pub mod index;
pub mod shared;
pub mod store;

pub use embedding::{EmbeddingProvider, HashingEmbedder, DEFAULT_HASHING_DIMENSION};
pub use error::{IndexError, Result};
pub use index::{cosine_similarity, EmbeddingIndex, IndexEntry, IndexHandle};
pub use shared::SharedIndex;
pub use store::{load_index, save_index, SNAPSHOT_FORMAT_VERSION};
