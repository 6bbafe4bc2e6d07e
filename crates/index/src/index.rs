//! Embedding index - chunk vectors with cosine nearest-neighbour lookup

use crate::embedding::EmbeddingProvider;
use crate::{IndexError, Result};
use chrono::{DateTime, Utc};
use healthguard_core::chunk::chunk_corpus;
use healthguard_core::{Chunk, ChunkConfig, CoreError, Corpus, DocumentMeta, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Shared, immutable reference to a fully built index.
///
/// Rebuilding produces a new handle; holders of an old handle keep seeing the
/// old index.
pub type IndexHandle = Arc<EmbeddingIndex>;

/// A chunk and its embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// An immutable vector index over the chunks of one corpus build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    generation: Uuid,
    built_at: DateTime<Utc>,
    model_id: String,
    dimension: usize,
    chunking: ChunkConfig,
    documents: Vec<DocumentMeta>,
    entries: Vec<IndexEntry>,
}

/// Cosine similarity; 0.0 when either vector has zero magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a * norm_b);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(IndexError::Config("k must be positive".into()));
    }
    Ok(())
}

impl EmbeddingIndex {
    /// Chunk a corpus and embed every chunk
    #[instrument(skip(corpus, embedder), fields(documents = corpus.len()))]
    pub async fn build(
        corpus: &Corpus,
        chunking: ChunkConfig,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        let chunks = chunk_corpus(corpus, &chunking)?;
        let documents = corpus.iter().map(|doc| doc.meta()).collect();
        Self::build_from_chunks(chunks, documents, chunking, embedder).await
    }

    /// Embed pre-chunked text.
    ///
    /// Every chunk must reference one of `documents`, and every vector must
    /// have the embedder's declared dimension.
    pub async fn build_from_chunks(
        chunks: Vec<Chunk>,
        documents: Vec<DocumentMeta>,
        chunking: ChunkConfig,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        chunking.validate()?;

        if let Some(orphan) = chunks
            .iter()
            .find(|chunk| !documents.iter().any(|doc| doc.id == chunk.document_id))
        {
            return Err(CoreError::DocumentNotFound(orphan.document_id.clone()).into());
        }

        let dimension = embedder.dimensions();
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

        debug!("Embedding {} chunks with {}", texts.len(), embedder.model_id());
        let vectors = embedder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(IndexError::Embedding {
                provider: embedder.model_id().to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            entries.push(IndexEntry { chunk, vector });
        }

        let index = Self {
            generation: Uuid::new_v4(),
            built_at: Utc::now(),
            model_id: embedder.model_id().to_string(),
            dimension,
            chunking,
            documents,
            entries,
        };

        info!(
            "Built index {} with {} chunks from {} documents (dim {})",
            index.generation,
            index.entries.len(),
            index.documents.len(),
            index.dimension
        );

        Ok(index)
    }

    /// Wrap into a shareable handle
    pub fn into_handle(self) -> IndexHandle {
        Arc::new(self)
    }

    /// Rank every chunk against a query vector and return the best `k`.
    ///
    /// Ties keep insertion order (the first indexed chunk wins). `k` larger
    /// than the index returns every chunk.
    pub fn query_vector(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        validate_k(k)?;
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(&entry.vector, query)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (position, score))| {
                let chunk = &self.entries[position].chunk;
                RetrievalResult {
                    chunk_id: chunk.chunk_id.clone(),
                    document_id: chunk.document_id.clone(),
                    score,
                    rank: i + 1,
                }
            })
            .collect())
    }

    /// Embed `query_text` and return the `k` nearest chunks.
    ///
    /// An empty index answers with no results without calling the embedder.
    #[instrument(skip(self, embedder), fields(generation = %self.generation))]
    pub async fn query(
        &self,
        query_text: &str,
        embedder: &dyn EmbeddingProvider,
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        validate_k(k)?;
        if self.entries.is_empty() {
            debug!("Query against empty index");
            return Ok(Vec::new());
        }

        let vector = embedder.embed(query_text).await?;
        self.query_vector(&vector, k)
    }

    /// Check internal consistency (used after loading a snapshot)
    pub fn verify(&self) -> Result<()> {
        self.chunking.validate()?;
        for entry in &self.entries {
            if entry.vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: entry.vector.len(),
                });
            }
            if self.document(&entry.chunk.document_id).is_none() {
                return Err(IndexError::InvalidSnapshot(format!(
                    "chunk {} references unknown document {}",
                    entry.chunk.chunk_id, entry.chunk.document_id
                )));
            }
        }
        Ok(())
    }

    /// Whether this index holds exactly the chunks `corpus` yields under
    /// `chunking`, with the same document metadata in the same order
    pub fn is_built_from(&self, corpus: &Corpus, chunking: ChunkConfig) -> bool {
        if self.chunking != chunking || self.documents.len() != corpus.len() {
            return false;
        }
        if !corpus.iter().zip(&self.documents).all(|(doc, meta)| doc.meta() == *meta) {
            return false;
        }
        match chunk_corpus(corpus, &chunking) {
            Ok(chunks) => chunks.len() == self.entries.len() && self.chunks().eq(chunks.iter()),
            Err(_) => false,
        }
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.entries
            .iter()
            .map(|entry| &entry.chunk)
            .find(|chunk| chunk.chunk_id == chunk_id)
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentMeta> {
        self.documents.iter().find(|doc| doc.id == document_id)
    }

    pub fn documents(&self) -> &[DocumentMeta] {
        &self.documents
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    /// Number of chunks indexed for a document
    pub fn chunk_count(&self, document_id: &str) -> usize {
        self.chunks().filter(|chunk| chunk.document_id == document_id).count()
    }

    /// Unique id of this build
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunking(&self) -> ChunkConfig {
        self.chunking
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
