//! Citation validator
//!
//! A citation is valid only if its `(chunk_id, document_id)` pair was
//! returned by the retrieval of the same pipeline run. Membership is never
//! checked against the whole corpus.

use healthguard_core::{Citation, DiagnosisItem, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    /// The cited chunk was not among this run's retrieval results
    CitationNotRetrieved,
    /// The item cites nothing
    UnsupportedClaim,
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CitationNotRetrieved => write!(f, "citation not in retrieved evidence"),
            Self::UnsupportedClaim => write!(f, "unsupported claim"),
        }
    }
}

/// One failed check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    /// Position of the offending item in the validated sequence
    pub item_index: usize,
    /// The offending citation; `None` for an uncited item
    pub citation: Option<Citation>,
    pub reason: ViolationReason,
}

/// Verdict over a whole diagnosis
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub citations_checked: usize,
}

impl ValidationReport {
    /// Violations raised against the item at `item_index`
    pub fn violations_for(&self, item_index: usize) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |violation| violation.item_index == item_index)
    }

    pub fn is_item_valid(&self, item_index: usize) -> bool {
        self.violations_for(item_index).next().is_none()
    }
}

/// Check every citation of every item against `results`.
///
/// Violations are ordered by item, then by citation order within the item.
pub fn validate(items: &[DiagnosisItem], results: &[RetrievalResult]) -> ValidationReport {
    let retrieved: HashSet<(&str, &str)> = results
        .iter()
        .map(|r| (r.chunk_id.as_str(), r.document_id.as_str()))
        .collect();

    let mut violations = Vec::new();
    let mut citations_checked = 0;

    for (item_index, item) in items.iter().enumerate() {
        if item.citations.is_empty() {
            violations.push(Violation {
                item_index,
                citation: None,
                reason: ViolationReason::UnsupportedClaim,
            });
            continue;
        }

        for citation in &item.citations {
            citations_checked += 1;
            let key = (citation.chunk_id.as_str(), citation.document_id.as_str());
            if !retrieved.contains(&key) {
                violations.push(Violation {
                    item_index,
                    citation: Some(citation.clone()),
                    reason: ViolationReason::CitationNotRetrieved,
                });
            }
        }
    }

    ValidationReport {
        valid: violations.is_empty(),
        violations,
        citations_checked,
    }
}
