//! On-disk index snapshots
//!
//! A snapshot is a single JSON file. Saving writes a uniquely named temp file
//! in the same directory and renames it into place, so a crashed save never
//! leaves a half-written snapshot behind and concurrent saves never share a
//! temp file.

use crate::index::EmbeddingIndex;
use crate::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, instrument};

/// Bumped whenever the serialized layout changes
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    index: EmbeddingIndex,
}

/// Persist an index to `path`
#[instrument(skip(index), fields(generation = %index.generation()))]
pub fn save_index(index: &EmbeddingIndex, path: &Path) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let snapshot = SnapshotRef {
        format_version: SNAPSHOT_FORMAT_VERSION,
        index,
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec(&snapshot)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    info!("Saved index snapshot to {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    index: &'a EmbeddingIndex,
}

/// Load and verify an index snapshot
#[instrument]
pub fn load_index(path: &Path) -> Result<EmbeddingIndex> {
    let bytes = std::fs::read(path)?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(IndexError::InvalidSnapshot(format!(
            "unsupported format version {} (expected {})",
            snapshot.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }

    snapshot.index.verify()?;
    info!(
        "Loaded index {} ({} chunks) from {}",
        snapshot.index.generation(),
        snapshot.index.len(),
        path.display()
    );
    Ok(snapshot.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use healthguard_core::{ChunkConfig, Corpus};

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");

        let embedder = HashingEmbedder::new(64);
        let index = EmbeddingIndex::build(&Corpus::builtin().unwrap(), ChunkConfig::default(), &embedder)
            .await
            .unwrap();
        save_index(&index, &path).unwrap();
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.generation(), index.generation());
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.model_id(), "hashing-fnv1a-64");

        let query = embedder.embed_text("productive cough and fever");
        assert_eq!(
            loaded.query_vector(&query, 3).unwrap(),
            index.query_vector(&query, 3).unwrap()
        );
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = EmbeddingIndex::build(&Corpus::default(), ChunkConfig::default(), &HashingEmbedder::new(8))
            .await
            .unwrap();
        save_index(&index, &path).unwrap();

        let mut raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["format_version"] = serde_json::json!(99);
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert!(matches!(load_index(&path), Err(IndexError::InvalidSnapshot(_))));
    }

    #[tokio::test]
    async fn test_concurrent_saves_to_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let corpus = Corpus::builtin().unwrap();

        let mut indexes = Vec::new();
        for _ in 0..6 {
            indexes.push(
                EmbeddingIndex::build(&corpus, ChunkConfig::default(), &HashingEmbedder::new(16))
                    .await
                    .unwrap(),
            );
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = indexes
                .iter()
                .map(|index| scope.spawn(|| save_index(index, &path)))
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });

        let loaded = load_index(&path).unwrap();
        assert!(indexes.iter().any(|index| index.generation() == loaded.generation()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_index(Path::new("/nonexistent/healthguard/index.json")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }
}
