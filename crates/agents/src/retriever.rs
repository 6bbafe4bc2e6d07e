//! Literature retriever - turns findings into a query and fetches evidence

use crate::Result;
use healthguard_core::{Citation, Finding, RetrievalResult};
use healthguard_index::{EmbeddingIndex, EmbeddingProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// A retrieved chunk together with the text and metadata the generator needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub result: RetrievalResult,
    pub text: String,
    pub title: String,
    pub source_ref: String,
}

impl Evidence {
    pub fn chunk_id(&self) -> &str {
        &self.result.chunk_id
    }

    pub fn document_id(&self) -> &str {
        &self.result.document_id
    }

    pub fn citation(&self) -> Citation {
        self.result.citation()
    }
}

/// Output of one retrieval: the query that was issued and its ranked evidence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Retrieval {
    pub query_text: String,
    pub evidence: Vec<Evidence>,
}

impl Retrieval {
    /// The ranked results, without text
    pub fn results(&self) -> Vec<RetrievalResult> {
        self.evidence.iter().map(|e| e.result.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.evidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }
}

/// Query `index` with the text of `finding` and return the top `k` chunks.
///
/// An empty index yields an empty retrieval. Embedding failures propagate
/// unretried; the caller owns the retry policy.
#[instrument(skip(finding, index, embedder), fields(generation = %index.generation()))]
pub async fn retrieve(
    finding: &Finding,
    index: &EmbeddingIndex,
    embedder: &dyn EmbeddingProvider,
    k: usize,
) -> Result<Retrieval> {
    let query_text = finding.query_text();
    let results = index.query(&query_text, embedder, k).await?;

    let evidence = results
        .into_iter()
        .map(|result| {
            let text = index
                .chunk(&result.chunk_id)
                .map(|chunk| chunk.text.clone())
                .unwrap_or_default();
            let (title, source_ref) = index
                .document(&result.document_id)
                .map(|doc| (doc.title.clone(), doc.source_ref.clone()))
                .unwrap_or_default();
            Evidence {
                result,
                text,
                title,
                source_ref,
            }
        })
        .collect::<Vec<_>>();

    debug!("Query '{}' returned {} chunks", query_text, evidence.len());
    Ok(Retrieval {
        query_text,
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthguard_core::{ChunkConfig, Corpus, Document, FindingEntry};
    use healthguard_index::HashingEmbedder;

    #[tokio::test]
    async fn test_retrieve_attaches_metadata() {
        let embedder = HashingEmbedder::default();
        let corpus = Corpus::from_documents(vec![
            Document::new("pneumonia", "Pneumonia Review", "https://example.org/p", "Fever and productive cough."),
            Document::new("stroke", "Stroke Review", "https://example.org/s", "Sudden hemiparesis and aphasia."),
        ])
        .unwrap();
        let index = EmbeddingIndex::build(&corpus, ChunkConfig::default(), &embedder)
            .await
            .unwrap();

        let finding = Finding::new()
            .with_symptom(FindingEntry::new("fever"))
            .with_symptom(FindingEntry::new("cough"));
        let retrieval = retrieve(&finding, &index, &embedder, 1).await.unwrap();

        assert_eq!(retrieval.query_text, "fever cough");
        assert_eq!(retrieval.len(), 1);
        assert_eq!(retrieval.evidence[0].document_id(), "pneumonia");
        assert_eq!(retrieval.evidence[0].title, "Pneumonia Review");
        assert_eq!(retrieval.evidence[0].text, "Fever and productive cough.");
    }

    #[tokio::test]
    async fn test_empty_index_is_not_an_error() {
        let embedder = HashingEmbedder::default();
        let index = EmbeddingIndex::build(&Corpus::default(), ChunkConfig::default(), &embedder)
            .await
            .unwrap();

        let finding = Finding::new().with_symptom(FindingEntry::new("fever"));
        let retrieval = retrieve(&finding, &index, &embedder, 5).await.unwrap();
        assert!(retrieval.is_empty());
        assert!(retrieval.results().is_empty());
    }
}
