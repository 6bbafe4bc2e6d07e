//! Chunker - overlapping fixed-size passages with stable identifiers
//!
//! Offsets and sizes are measured in characters (Unicode scalar values), so a
//! chunk boundary can never split a multi-byte character.

use crate::corpus::Corpus;
use crate::document::Document;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default passage size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between consecutive passages in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Chunking parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Create a validated config
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Both values must be positive and `overlap < chunk_size`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::Config("chunk_size must be positive".into()));
        }
        if self.overlap == 0 {
            return Err(CoreError::Config("overlap must be positive".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(CoreError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between the starts of consecutive chunks
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A contiguous, addressable slice of a document's text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Stable identifier: `{document_id}-chunk{index}@{start}-{end}`
    pub chunk_id: String,

    /// Parent document
    pub document_id: String,

    /// Position of this chunk within its document
    pub index: usize,

    pub text: String,

    /// Inclusive start offset (characters)
    pub start_offset: usize,

    /// Exclusive end offset (characters)
    pub end_offset: usize,
}

/// Build the identifier of the `index`-th chunk of a document.
///
/// The character span is part of the id, so the same position under a
/// different chunk config names a different chunk.
pub fn chunk_id(document_id: &str, index: usize, start_offset: usize, end_offset: usize) -> String {
    format!("{}-chunk{}@{}-{}", document_id, index, start_offset, end_offset)
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Recover the document id from a chunk identifier, if it is well-formed.
///
/// Accepts `{doc}-chunk{index}@{start}-{end}` and the bare `{doc}-chunk{index}`.
pub fn document_id_of(chunk_id: &str) -> Option<&str> {
    let (document_id, suffix) = chunk_id.rsplit_once("-chunk")?;
    let well_formed = match suffix.split_once('@') {
        Some((index, span)) => {
            is_number(index)
                && span
                    .split_once('-')
                    .is_some_and(|(start, end)| is_number(start) && is_number(end))
        }
        None => is_number(suffix),
    };
    if document_id.is_empty() || !well_formed {
        return None;
    }
    Some(document_id)
}

/// Split a document into overlapping chunks.
///
/// Chunk `i` spans `[i * step, i * step + chunk_size)`, clamped to the
/// document length; chunking stops at the first chunk that reaches the end.
/// A document shorter than `chunk_size` (including an empty one) yields a
/// single chunk spanning the whole text.
pub fn chunk_document(document: &Document, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    // Byte position of every character boundary, including the end of text.
    let boundaries: Vec<usize> = document
        .text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(document.text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut index = 0;

    loop {
        let start = index * config.step();
        let end = (start + config.chunk_size).min(char_len);

        chunks.push(Chunk {
            chunk_id: chunk_id(&document.id, index, start, end),
            document_id: document.id.clone(),
            index,
            text: document.text[boundaries[start]..boundaries[end]].to_string(),
            start_offset: start,
            end_offset: end,
        });

        if end >= char_len {
            break;
        }
        index += 1;
    }

    debug!(
        "Chunked document {} ({} chars) into {} chunks",
        document.id,
        char_len,
        chunks.len()
    );

    Ok(chunks)
}

/// Chunk every document of a corpus, preserving corpus order
pub fn chunk_corpus(corpus: &Corpus, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for document in corpus.iter() {
        chunks.extend(chunk_document(document, config)?);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(text: &str) -> Document {
        Document::new("doc1", "Title", "https://example.org", text)
    }

    /// Concatenate chunks, dropping the part each chunk shares with its predecessor.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut text = String::new();
        let mut covered = 0;
        for chunk in chunks {
            let skip = covered - chunk.start_offset;
            text.extend(chunk.text.chars().skip(skip));
            covered = chunk.end_offset;
        }
        text
    }

    #[test]
    fn test_boundaries_follow_step() {
        let text = "a".repeat(250);
        let chunks = chunk_document(&doc(&text), &ChunkConfig::new(100, 20).unwrap()).unwrap();

        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
        assert_eq!(chunks[2].chunk_id, "doc1-chunk2@160-250");
        assert_eq!(chunks[2].text.len(), 90);
    }

    #[test]
    fn test_short_document_yields_single_chunk() {
        let chunks = chunk_document(&doc("short text"), &ChunkConfig::default()).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 10));
    }

    #[test]
    fn test_empty_document_yields_single_empty_chunk() {
        let chunks = chunk_document(&doc(""), &ChunkConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.is_empty());
    }

    #[test]
    fn test_exact_fit_does_not_emit_trailing_chunk() {
        let text = "b".repeat(180);
        let chunks = chunk_document(&doc(&text), &ChunkConfig::new(100, 20).unwrap()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end_offset, 180);
    }

    #[test]
    fn test_multibyte_text_is_split_on_characters() {
        let text = "EF ≤40% and QRS ≥150 ms";
        let chunks = chunk_document(&doc(text), &ChunkConfig::new(6, 2).unwrap()).unwrap();
        assert_eq!(reconstruct(&chunks), text);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 6));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(ChunkConfig::new(0, 0), Err(CoreError::Config(_))));
        assert!(matches!(ChunkConfig::new(100, 0), Err(CoreError::Config(_))));
        assert!(matches!(ChunkConfig::new(100, 100), Err(CoreError::Config(_))));
        assert!(matches!(ChunkConfig::new(100, 150), Err(CoreError::Config(_))));

        let bad = ChunkConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert!(matches!(chunk_document(&doc("text"), &bad), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_document_id_of() {
        assert_eq!(document_id_of("doc99-chunk0"), Some("doc99"));
        assert_eq!(document_id_of("doc1-chunk1@80-180"), Some("doc1"));
        assert_eq!(document_id_of("doc1-chunk1@80"), None);
        assert_eq!(document_id_of("doc1-chunk1@80-x"), None);
        assert_eq!(document_id_of("PMC_a-b-chunk12"), Some("PMC_a-b"));
        assert_eq!(document_id_of("doc99"), None);
        assert_eq!(document_id_of("doc99-chunkx"), None);
    }

    #[test]
    fn test_chunk_corpus_keeps_order() {
        let corpus = Corpus::from_documents(vec![
            Document::new("b", "B", "s", "x".repeat(30)),
            Document::new("a", "A", "s", "y".repeat(5)),
        ])
        .unwrap();
        let chunks = chunk_corpus(&corpus, &ChunkConfig::new(20, 5).unwrap()).unwrap();

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b-chunk0@0-20", "b-chunk1@15-30", "a-chunk0@0-5"]);
    }

    #[test]
    fn test_chunk_ids_differ_across_configs() {
        let text = "c".repeat(240);
        let a = chunk_document(&doc(&text), &ChunkConfig::new(100, 20).unwrap()).unwrap();
        let b = chunk_document(&doc(&text), &ChunkConfig::new(60, 10).unwrap()).unwrap();

        assert_eq!(a[1].chunk_id, "doc1-chunk1@80-180");
        assert_eq!(b[1].chunk_id, "doc1-chunk1@50-110");
        assert_ne!(a[0].chunk_id, b[0].chunk_id);
        assert!(a.iter().all(|x| b.iter().all(|y| x.chunk_id != y.chunk_id)));
    }

    proptest! {
        #[test]
        fn prop_chunks_reconstruct_document(
            text in "\\PC{0,400}",
            chunk_size in 2usize..80,
            overlap_seed in 1usize..80,
        ) {
            let overlap = 1 + overlap_seed % (chunk_size - 1);
            let config = ChunkConfig::new(chunk_size, overlap).unwrap();
            let document = doc(&text);
            let chunks = chunk_document(&document, &config).unwrap();

            prop_assert_eq!(reconstruct(&chunks), text.clone());
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.start_offset, i * config.step());
                prop_assert!(chunk.end_offset - chunk.start_offset <= chunk_size);
                prop_assert!(document.text.contains(chunk.text.as_str()));
            }
        }

        #[test]
        fn prop_chunking_is_deterministic(
            text in "[a-z ]{0,300}",
            chunk_size in 2usize..60,
        ) {
            let config = ChunkConfig::new(chunk_size, chunk_size / 2).unwrap();
            let document = doc(&text);

            let first = chunk_document(&document, &config).unwrap();
            let second = chunk_document(&document, &config).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
