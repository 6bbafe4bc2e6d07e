//! Retrieval results, citations and diagnosis items

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One ranked hit of a retrieval query.
///
/// Results of a query are sorted by descending score and ranked `1..=n`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    /// Cosine similarity (higher is closer)
    pub score: f32,
    /// 1-based rank
    pub rank: usize,
}

impl RetrievalResult {
    /// The citation that points at this result
    pub fn citation(&self) -> Citation {
        Citation::new(self.chunk_id.clone(), self.document_id.clone())
    }
}

/// Reference from a diagnostic claim to a retrieved chunk.
///
/// Only meaningful within the pipeline run whose retrieval produced the chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
}

impl Citation {
    pub fn new(chunk_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
        }
    }
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} / {}]", self.document_id, self.chunk_id)
    }
}

/// Generator's confidence in a ranked condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Moderate,
    Low,
}

impl Confidence {
    /// Bucket a keyword match ratio: at least 60% is high, at least 35% moderate
    pub fn from_ratio(matched: usize, possible: usize) -> Self {
        let pct = matched as f32 / possible.max(1) as f32 * 100.0;
        if pct >= 60.0 {
            Self::High
        } else if pct >= 35.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    /// Lenient parse of model output ("High", "moderate", ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "moderate" | "medium" => Some(Self::Moderate),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Moderate => write!(f, "Moderate"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// A ranked condition in a differential diagnosis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisItem {
    pub condition_name: String,
    /// 1-based rank in the differential
    pub rank: usize,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub citations: BTreeSet<Citation>,
}

impl DiagnosisItem {
    pub fn new(condition_name: impl Into<String>, rank: usize) -> Self {
        Self {
            condition_name: condition_name.into(),
            rank,
            rationale: String::new(),
            confidence: None,
            citations: BTreeSet::new(),
        }
    }

    /// Builder: set rationale
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Builder: set confidence
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Builder: add a citation
    pub fn cite(mut self, citation: Citation) -> Self {
        self.citations.insert(citation);
        self
    }

    pub fn is_cited(&self) -> bool {
        !self.citations.is_empty()
    }
}
