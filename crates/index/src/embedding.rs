//! Embedding provider capability and the offline hashing embedder

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Default dimension of the hashing embedder (matches MiniLM-sized models)
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// A function from text to a fixed-dimension vector.
///
/// Implementations must be deterministic for a given `model_id`. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends with native
/// batching override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of every vector this provider returns
    fn dimensions(&self) -> usize;

    /// Identifier of the model (and version) producing the vectors
    fn model_id(&self) -> &str;
}

/// Deterministic feature-hashing embedder.
///
/// Terms are lowercased alphanumeric runs of at least two characters, hashed
/// with FNV-1a into `dimensions` buckets and weighted by term frequency times
/// a length-based idf approximation. The result is L2-normalised. Needs no
/// model download or network, so it backs tests and offline runs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("hashing-fnv1a-{}", dimensions.max(1)),
        }
    }

    fn hash_term(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= 2)
            .map(|s| s.to_lowercase())
            .collect()
    }

    /// Embed synchronously; the async trait method delegates here
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];
        if tokens.is_empty() {
            return vector;
        }

        // BTreeMap keeps float accumulation order stable across runs.
        let mut tf: BTreeMap<&str, f32> = BTreeMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        for (term, count) in tf {
            let idf = 1.0 + (term.chars().count() as f32).ln();
            vector[Self::hash_term(term, self.dimensions)] += count / total * idf;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed_text("");
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("fever, cough and crackles");
        let b = embedder.embed_text("fever, cough and crackles");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::new(128);
        assert_eq!(embedder.embed_text("Fever; COUGH"), embedder.embed_text("fever cough"));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["dyspnea".to_string(), "chest pain".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed("chest pain").await.unwrap());
        assert_eq!(embedder.model_id(), "hashing-fnv1a-32");
    }
}
