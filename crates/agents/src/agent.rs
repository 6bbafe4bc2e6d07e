//! The clinical agent capability
//!
//! Extraction and generation are provided by one agent so the pipeline can
//! pick a backend once, at configuration time, and never branch on it.

use crate::retriever::Evidence;
use crate::Result;
use async_trait::async_trait;
use healthguard_core::{DiagnosisItem, Finding};

#[async_trait]
pub trait ClinicalAgent: Send + Sync {
    /// Short name for logs and run metadata
    fn name(&self) -> &str;

    /// Pull structured findings out of a free-text note
    async fn extract(&self, note: &str) -> Result<Finding>;

    /// Produce a ranked differential from findings and retrieved evidence.
    ///
    /// Citations must be drawn from `evidence`; the validator flags any that
    /// are not.
    async fn generate(&self, finding: &Finding, evidence: &[Evidence]) -> Result<Vec<DiagnosisItem>>;
}
