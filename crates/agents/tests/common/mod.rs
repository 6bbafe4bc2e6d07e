//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use healthguard_agents::{AgentError, ClinicalAgent, Evidence, RetryPolicy};
use healthguard_core::{ChunkConfig, Corpus, DiagnosisItem, Document, Finding};
use healthguard_index::{EmbeddingProvider, HashingEmbedder, IndexError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A 240-character pneumonia summary
pub fn pneumonia_text() -> String {
    "Community acquired pneumonia presents with fever, cough and crackles on auscultation. "
        .repeat(3)
        .chars()
        .take(240)
        .collect()
}

/// One document that chunks into exactly three chunks with [`three_chunks`]
pub fn pneumonia_corpus() -> Corpus {
    Corpus::from_documents(vec![Document::new(
        "doc1",
        "Pneumonia Review",
        "https://example.org/pneumonia",
        pneumonia_text(),
    )])
    .expect("valid corpus")
}

pub fn three_chunks() -> ChunkConfig {
    ChunkConfig::new(100, 20).expect("valid chunking")
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
    }
}

/// Agent with canned outputs
pub struct ScriptedAgent {
    pub finding: Finding,
    pub items: Vec<DiagnosisItem>,
    pub generation_error: Option<String>,
}

impl ScriptedAgent {
    pub fn new(finding: Finding, items: Vec<DiagnosisItem>) -> Self {
        Self {
            finding,
            items,
            generation_error: None,
        }
    }

    pub fn failing_generation(finding: Finding, message: &str) -> Self {
        Self {
            finding,
            items: Vec::new(),
            generation_error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ClinicalAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn extract(&self, _note: &str) -> healthguard_agents::Result<Finding> {
        Ok(self.finding.clone())
    }

    async fn generate(
        &self,
        _finding: &Finding,
        _evidence: &[Evidence],
    ) -> healthguard_agents::Result<Vec<DiagnosisItem>> {
        match &self.generation_error {
            Some(message) => Err(AgentError::Generation(message.clone())),
            None => Ok(self.items.clone()),
        }
    }
}

/// Hashing embedder that fails its first `failures` single-text calls
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    failures: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> healthguard_index::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IndexError::Embedding {
                provider: "flaky".into(),
                message: "connection reset".into(),
            });
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
