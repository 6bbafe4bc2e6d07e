//! Agent error types

use healthguard_core::CoreError;
use healthguard_index::IndexError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Model output could not be parsed: {0}")]
    InvalidOutput(String),

    #[error("Location lookup failed: {0}")]
    Lookup(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Caller-facing classification of a failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    CorpusLoad,
    DimensionMismatch,
    Retrieval,
    Generation,
    Extraction,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Config => "ConfigError",
            Self::CorpusLoad => "CorpusLoadError",
            Self::DimensionMismatch => "DimensionMismatchError",
            Self::Retrieval => "RetrievalError",
            Self::Generation => "GenerationError",
            Self::Extraction => "ExtractionError",
        };
        write!(f, "{}", name)
    }
}

impl AgentError {
    /// Classify this error; backend failures without an inherent kind are
    /// attributed to `stage_kind`, the kind of the stage they happened in.
    pub fn kind_in(&self, stage_kind: ErrorKind) -> ErrorKind {
        match self {
            Self::Core(CoreError::Config(_)) | Self::Config(_) => ErrorKind::Config,
            Self::Index(IndexError::Config(_)) => ErrorKind::Config,
            Self::Index(IndexError::Core(CoreError::Config(_))) => ErrorKind::Config,
            Self::Core(CoreError::CorpusLoad(_) | CoreError::DocumentNotFound(_)) => {
                ErrorKind::CorpusLoad
            }
            Self::Index(IndexError::Core(
                CoreError::CorpusLoad(_) | CoreError::DocumentNotFound(_),
            )) => ErrorKind::CorpusLoad,
            Self::Index(IndexError::DimensionMismatch { .. }) => ErrorKind::DimensionMismatch,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Generation(_) => ErrorKind::Generation,
            Self::Retrieval(_) => ErrorKind::Retrieval,
            _ => stage_kind,
        }
    }

    /// Classification outside of any pipeline stage
    pub fn kind(&self) -> ErrorKind {
        self.kind_in(ErrorKind::Retrieval)
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only external-call failures qualify; structural errors are
    /// deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::Index(IndexError::Embedding { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = AgentError::from(IndexError::DimensionMismatch {
            expected: 384,
            actual: 768,
        });
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert!(!err.is_transient());

        let err = AgentError::from(CoreError::CorpusLoad("duplicate document id: a".into()));
        assert_eq!(err.kind_in(ErrorKind::Generation), ErrorKind::CorpusLoad);

        let err = AgentError::from(IndexError::Config("k must be positive".into()));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_backend_errors_take_stage_kind() {
        let err = AgentError::Timeout {
            operation: "chat completion".into(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.kind_in(ErrorKind::Generation), ErrorKind::Generation);
        assert!(err.is_transient());

        let err = AgentError::InvalidOutput("not json".into());
        assert_eq!(err.kind_in(ErrorKind::Extraction), ErrorKind::Extraction);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_embedding_failure_is_transient() {
        let err = AgentError::from(IndexError::Embedding {
            provider: "tei".into(),
            message: "connection refused".into(),
        });
        assert!(err.is_transient());
        assert_eq!(err.kind_in(ErrorKind::Retrieval), ErrorKind::Retrieval);
    }
}
