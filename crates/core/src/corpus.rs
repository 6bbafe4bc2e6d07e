//! Corpus store - the fixed literature set all citations are checked against

use crate::document::{Document, DocumentRecord};
use crate::{CoreError, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Built-in demo corpus: eleven review-article summaries
const BUILTIN_CORPUS: &str = include_str!("../data/corpus.json");

/// Version tag of the built-in corpus
pub const BUILTIN_CORPUS_VERSION: &str = "2024.1";

/// An ordered, read-only set of documents with unique ids
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<Document>,
    by_id: HashMap<String, usize>,
}

/// Validate external records and build a corpus in declaration order.
///
/// Fails with [`CoreError::CorpusLoad`] when a record is missing a required
/// field (absent or blank) or reuses an id.
pub fn load_corpus(records: Vec<DocumentRecord>) -> Result<Corpus> {
    let mut documents = Vec::with_capacity(records.len());
    let mut by_id = HashMap::with_capacity(records.len());

    for (position, record) in records.into_iter().enumerate() {
        let id = required(position, "id", record.id)?;
        let title = required(position, "title", record.title)?;
        let source_ref = required(position, "source_ref", record.source_ref)?;
        let text = required(position, "text", record.text)?;

        if by_id.contains_key(&id) {
            return Err(CoreError::CorpusLoad(format!("duplicate document id: {}", id)));
        }

        by_id.insert(id.clone(), documents.len());
        documents.push(Document {
            id,
            title,
            source_ref,
            text,
        });
    }

    info!("Loaded corpus with {} documents", documents.len());
    Ok(Corpus { documents, by_id })
}

fn required(position: usize, field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CoreError::CorpusLoad(format!(
            "document #{} is missing required field `{}`",
            position, field
        ))),
    }
}

impl Corpus {
    /// Parse a JSON array of document records
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<DocumentRecord> = serde_json::from_str(json)
            .map_err(|e| CoreError::CorpusLoad(format!("invalid corpus JSON: {}", e)))?;
        load_corpus(records)
    }

    /// The built-in demo corpus shipped with the crate
    pub fn builtin() -> Result<Self> {
        debug!("Loading built-in corpus {}", BUILTIN_CORPUS_VERSION);
        Self::from_json(BUILTIN_CORPUS)
    }

    /// Validate already-constructed documents (e.g. for an index rebuild)
    pub fn from_documents(documents: Vec<Document>) -> Result<Self> {
        load_corpus(documents.into_iter().map(DocumentRecord::from).collect())
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id).map(|&index| &self.documents[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Documents in declaration order
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
