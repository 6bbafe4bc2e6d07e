//! Index error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Core error: {0}")]
    Core(#[from] healthguard_core::CoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding error ({provider}): {message}")]
    Embedding { provider: String, message: String },

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
