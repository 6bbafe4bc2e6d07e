//! Atomic rebuild-and-swap of the live index

use crate::embedding::EmbeddingProvider;
use crate::index::{EmbeddingIndex, IndexHandle};
use crate::Result;
use healthguard_core::{ChunkConfig, Corpus};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// The currently published index, shared by concurrent pipeline runs.
///
/// Readers take a cheap handle clone and release the lock immediately, so a
/// slow query or a stalled embedding call never holds it. A rebuild runs
/// entirely outside the lock and only the final pointer swap is exclusive,
/// which means a reader sees either the old or the new index, never a mix.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    current: Arc<RwLock<IndexHandle>>,
}

impl SharedIndex {
    pub fn new(index: EmbeddingIndex) -> Self {
        Self::from_handle(index.into_handle())
    }

    pub fn from_handle(handle: IndexHandle) -> Self {
        Self {
            current: Arc::new(RwLock::new(handle)),
        }
    }

    /// Handle to the index as of now
    pub async fn current(&self) -> IndexHandle {
        self.current.read().await.clone()
    }

    /// Replace the published index, returning the previous handle
    pub async fn publish(&self, handle: IndexHandle) -> IndexHandle {
        let mut current = self.current.write().await;
        let previous = std::mem::replace(&mut *current, handle);
        info!(
            "Published index {} (replaced {})",
            current.generation(),
            previous.generation()
        );
        previous
    }

    /// Build a fresh index from `corpus` and publish it once complete.
    ///
    /// On failure the previously published index stays in place.
    #[instrument(skip(self, corpus, embedder))]
    pub async fn rebuild(
        &self,
        corpus: &Corpus,
        chunking: ChunkConfig,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<IndexHandle> {
        let handle = EmbeddingIndex::build(corpus, chunking, embedder)
            .await?
            .into_handle();
        self.publish(handle.clone()).await;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use healthguard_core::Document;

    fn corpus(prefix: &str) -> Corpus {
        Corpus::from_documents(
            (0..3)
                .map(|i| {
                    Document::new(
                        format!("{}{}", prefix, i),
                        "Title",
                        "ref",
                        "fever cough dyspnea chest pain",
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_old_handle_survives_rebuild() {
        let embedder = HashingEmbedder::new(32);
        let chunking = ChunkConfig::default();
        let first = EmbeddingIndex::build(&corpus("a"), chunking, &embedder).await.unwrap();
        let shared = SharedIndex::new(first);

        let old = shared.current().await;
        let new = shared.rebuild(&corpus("b"), chunking, &embedder).await.unwrap();

        assert_ne!(old.generation(), new.generation());
        assert_eq!(shared.current().await.generation(), new.generation());
        assert!(old.document("a0").is_some());
        assert!(old.document("b0").is_none());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_current() {
        let embedder = HashingEmbedder::new(32);
        let first = EmbeddingIndex::build(&corpus("a"), ChunkConfig::default(), &embedder)
            .await
            .unwrap();
        let generation = first.generation();
        let shared = SharedIndex::new(first);

        let bad = ChunkConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert!(shared.rebuild(&corpus("b"), bad, &embedder).await.is_err());
        assert_eq!(shared.current().await.generation(), generation);
    }
}
