//! Pipeline orchestrator
//!
//! One run moves strictly forward through
//! `Init -> Extracting -> Retrieving -> Generating -> Validating -> Done`,
//! or jumps to `Failed` on a hard fault. Citation violations are data, not
//! faults: they end the run in `Done` with the affected items flagged.

use crate::agent::ClinicalAgent;
use crate::config::{PipelineConfig, UnverifiedPolicy};
use crate::error::ErrorKind;
use crate::retriever::{retrieve, Retrieval};
use crate::validator::{validate, ValidationReport, ViolationReason};
use crate::{AgentError, Result};
use chrono::{DateTime, Utc};
use healthguard_core::{ChunkConfig, Corpus, DiagnosisItem, Document, Finding};
use healthguard_index::{EmbeddingIndex, EmbeddingProvider, IndexHandle, SharedIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Extracting,
    Retrieving,
    Generating,
    Validating,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Extracting => "EXTRACTING",
            Self::Retrieving => "RETRIEVING",
            Self::Generating => "GENERATING",
            Self::Validating => "VALIDATING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Validation outcome of one diagnosis item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Verified,
    Unverified { reasons: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatedItem {
    pub item: DiagnosisItem,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ValidatedItem {
    pub fn is_verified(&self) -> bool {
        self.status == ItemStatus::Verified
    }
}

/// Where and why a run failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    /// The state the run was in when the fault occurred
    pub stage: PipelineState,
    pub kind: ErrorKind,
    pub message: String,
}

/// Elapsed milliseconds per stage; `None` for stages that never ran
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTimings {
    pub extraction_ms: Option<u64>,
    pub retrieval_ms: Option<u64>,
    pub generation_ms: Option<u64>,
    pub validation_ms: Option<u64>,
}

/// Everything a caller learns about one pipeline run.
///
/// A failed run keeps the output of every stage that completed before the
/// fault, but never a diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub agent: String,
    /// Generation of the index snapshot this run used
    pub index_generation: Uuid,
    pub state: PipelineState,
    /// Last stage that finished successfully
    pub last_completed: Option<PipelineState>,
    pub finding: Option<Finding>,
    pub retrieval: Option<Retrieval>,
    pub diagnosis: Vec<ValidatedItem>,
    /// Items removed under [`UnverifiedPolicy::Strip`]
    pub rejected: Vec<ValidatedItem>,
    pub validation: Option<ValidationReport>,
    pub failure: Option<StageFailure>,
    pub timings: StageTimings,
}

impl PipelineResult {
    fn start(agent: &str, index_generation: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            agent: agent.to_string(),
            index_generation,
            state: PipelineState::Init,
            last_completed: None,
            finding: None,
            retrieval: None,
            diagnosis: Vec::new(),
            rejected: Vec::new(),
            validation: None,
            failure: None,
            timings: StageTimings::default(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug_assert!(next > self.state && !self.state.is_terminal());
        info!("Run {}: {} -> {}", self.run_id, self.state, next);
        if self.state != PipelineState::Init {
            self.last_completed = Some(self.state);
        }
        self.state = next;
    }

    fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        let failure = StageFailure {
            stage: self.state,
            kind,
            message: message.into(),
        };
        warn!(
            "Run {} failed in {}: {} ({})",
            self.run_id, failure.stage, failure.message, failure.kind
        );
        self.failure = Some(failure);
        self.state = PipelineState::Failed;
        self
    }

    fn fail_with(self, stage_kind: ErrorKind, err: AgentError) -> Self {
        let kind = err.kind_in(stage_kind);
        self.fail(kind, err.to_string())
    }

    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn is_failed(&self) -> bool {
        self.state == PipelineState::Failed
    }

    /// Items that passed validation
    pub fn verified(&self) -> impl Iterator<Item = &ValidatedItem> {
        self.diagnosis.iter().filter(|item| item.is_verified())
    }

    /// A completed run in which no item survived validation
    pub fn no_supported_diagnosis(&self) -> bool {
        self.is_done() && self.verified().next().is_none()
    }

    /// Best-ranked verified item, else the best-ranked item of any status
    pub fn top_item(&self) -> Option<&DiagnosisItem> {
        self.verified()
            .next()
            .or_else(|| self.diagnosis.first())
            .map(|validated| &validated.item)
    }
}

fn elapsed_ms(start: Instant) -> Option<u64> {
    Some(start.elapsed().as_millis() as u64)
}

/// Annotate every item with its verdict, in generation order
fn annotate(items: Vec<DiagnosisItem>, report: &ValidationReport) -> Vec<ValidatedItem> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let reasons: Vec<String> = report
                .violations_for(i)
                .map(|violation| match (&violation.reason, &violation.citation) {
                    (ViolationReason::CitationNotRetrieved, Some(citation)) => {
                        format!("{}: {}", violation.reason, citation)
                    }
                    _ => violation.reason.to_string(),
                })
                .collect();
            let status = if reasons.is_empty() {
                ItemStatus::Verified
            } else {
                ItemStatus::Unverified { reasons }
            };
            ValidatedItem { item, status }
        })
        .collect()
}

/// The four-stage pipeline over a shared, atomically swappable index
#[derive(Clone)]
pub struct Pipeline {
    agent: Arc<dyn ClinicalAgent>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: SharedIndex,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        agent: Arc<dyn ClinicalAgent>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: SharedIndex,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            agent,
            embedder,
            index,
            config,
        })
    }

    /// Build the first index from `corpus` and assemble a pipeline over it
    pub async fn from_corpus(
        corpus: &Corpus,
        agent: Arc<dyn ClinicalAgent>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let index = EmbeddingIndex::build(corpus, config.chunking, embedder.as_ref()).await?;
        Self::new(agent, embedder, SharedIndex::new(index), config)
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn agent(&self) -> &Arc<dyn ClinicalAgent> {
        &self.agent
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one note through the pipeline.
    ///
    /// Never returns an error: faults are reported as a `Failed` result with
    /// stage attribution. The run uses the index published when it started,
    /// even if a rebuild lands meanwhile.
    #[instrument(skip(self, note), fields(note_chars = note.len()))]
    pub async fn run_pipeline(&self, note: &str) -> PipelineResult {
        let handle = self.index.current().await;
        let mut run = PipelineResult::start(self.agent.name(), handle.generation());
        info!("Run {} started on index {}", run.run_id, run.index_generation);

        let agent = self.agent.as_ref();
        let embedder = self.embedder.as_ref();
        let retry = self.config.retry;

        // Extraction
        run.enter(PipelineState::Extracting);
        let started = Instant::now();
        let extracted = retry.run("extraction", move || agent.extract(note)).await;
        run.timings.extraction_ms = elapsed_ms(started);
        let finding = match extracted {
            Ok(finding) if finding.is_empty() => {
                return run.fail(ErrorKind::Extraction, "no clinical findings could be extracted")
            }
            Ok(finding) => finding,
            Err(err) => return run.fail_with(ErrorKind::Extraction, err),
        };
        debug!("Extracted {} findings", finding.len());
        run.finding = Some(finding.clone());

        // Retrieval
        run.enter(PipelineState::Retrieving);
        let started = Instant::now();
        let index: &EmbeddingIndex = &handle;
        let finding_ref = &finding;
        let k = self.config.top_k;
        let retrieved = retry
            .run("retrieval", move || retrieve(finding_ref, index, embedder, k))
            .await;
        run.timings.retrieval_ms = elapsed_ms(started);
        let retrieval = match retrieved {
            Ok(retrieval) => retrieval,
            Err(err) => return run.fail_with(ErrorKind::Retrieval, err),
        };
        run.retrieval = Some(retrieval.clone());

        // Generation
        run.enter(PipelineState::Generating);
        let started = Instant::now();
        let evidence = retrieval.evidence.as_slice();
        let generated = retry
            .run("generation", move || agent.generate(finding_ref, evidence))
            .await;
        run.timings.generation_ms = elapsed_ms(started);
        let items = match generated {
            Ok(items) => items,
            Err(err) => return run.fail_with(ErrorKind::Generation, err),
        };

        // Validation
        run.enter(PipelineState::Validating);
        let started = Instant::now();
        let report = validate(&items, &retrieval.results());
        let annotated = annotate(items, &report);
        run.timings.validation_ms = elapsed_ms(started);

        if !report.valid {
            info!(
                "Run {}: {} citation violations across {} items",
                run.run_id,
                report.violations.len(),
                annotated.iter().filter(|item| !item.is_verified()).count()
            );
        }

        match self.config.unverified_policy {
            UnverifiedPolicy::Surface => run.diagnosis = annotated,
            UnverifiedPolicy::Strip => {
                let (kept, rejected): (Vec<_>, Vec<_>) =
                    annotated.into_iter().partition(|item| item.is_verified());
                run.diagnosis = kept;
                run.rejected = rejected;
            }
        }
        run.validation = Some(report);

        run.enter(PipelineState::Done);
        if run.no_supported_diagnosis() {
            info!("Run {}: no supported diagnosis", run.run_id);
        }
        run
    }

    /// Validate `documents`, build a fresh index and publish it.
    ///
    /// Runs already in flight keep the index they started with.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn rebuild_index(&self, documents: Vec<Document>, chunking: ChunkConfig) -> Result<IndexHandle> {
        chunking.validate()?;
        let corpus = Corpus::from_documents(documents)?;
        let corpus = &corpus;
        let shared = &self.index;
        let embedder = self.embedder.as_ref();

        let handle = self
            .config
            .retry
            .run("index rebuild", move || async move {
                shared
                    .rebuild(corpus, chunking, embedder)
                    .await
                    .map_err(AgentError::from)
            })
            .await?;
        info!("Rebuilt index {} with {} chunks", handle.generation(), handle.len());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(PipelineState::Init < PipelineState::Extracting);
        assert!(PipelineState::Validating < PipelineState::Done);
        assert!(PipelineState::Failed.is_terminal());
        assert_eq!(PipelineState::Retrieving.to_string(), "RETRIEVING");
    }

    #[test]
    fn test_no_supported_diagnosis_only_when_done() {
        let mut result = PipelineResult::start("test", Uuid::nil());
        assert!(!result.no_supported_diagnosis());

        result.enter(PipelineState::Extracting);
        let failed = result.fail(ErrorKind::Extraction, "boom");
        assert!(failed.is_failed());
        assert!(!failed.no_supported_diagnosis());
        assert_eq!(failed.failure.as_ref().unwrap().stage, PipelineState::Extracting);
        assert_eq!(failed.last_completed, None);
    }

    #[test]
    fn test_top_item_prefers_verified() {
        let mut result = PipelineResult::start("test", Uuid::nil());
        assert!(result.top_item().is_none());

        result.diagnosis = vec![
            ValidatedItem {
                item: DiagnosisItem::new("Sepsis", 1),
                status: ItemStatus::Unverified {
                    reasons: vec!["unsupported claim".into()],
                },
            },
            ValidatedItem {
                item: DiagnosisItem::new("COVID-19", 2),
                status: ItemStatus::Verified,
            },
        ];
        assert_eq!(result.top_item().unwrap().condition_name, "COVID-19");

        result.diagnosis[1].status = ItemStatus::Unverified { reasons: vec![] };
        assert_eq!(result.top_item().unwrap().condition_name, "Sepsis");
    }

    #[test]
    fn test_item_status_serialization() {
        let item = ValidatedItem {
            item: DiagnosisItem::new("Sepsis", 1),
            status: ItemStatus::Unverified {
                reasons: vec!["unsupported claim".into()],
            },
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["status"], "unverified");
        assert_eq!(json["reasons"][0], "unsupported claim");
        assert_eq!(json["item"]["condition_name"], "Sepsis");
    }
}
