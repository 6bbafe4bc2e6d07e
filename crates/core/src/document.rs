//! Document types - the literature the corpus is made of

use serde::{Deserialize, Serialize};

/// A reference article in the corpus.
///
/// Documents are immutable once loaded and live for the whole process.
/// Only [`crate::corpus::load_corpus`] constructs them from external records,
/// so every `Document` has passed field validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Unique article identifier (e.g. `PMC_pneumonia_review`)
    pub id: String,

    /// Human-readable article title
    pub title: String,

    /// URL or bibliographic citation of the original article
    pub source_ref: String,

    /// Full article text
    pub text: String,
}

impl Document {
    /// Create a document directly, bypassing corpus validation.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_ref: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_ref: source_ref.into(),
            text: text.into(),
        }
    }

    /// Metadata without the article body
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            title: self.title.clone(),
            source_ref: self.source_ref.clone(),
        }
    }

    /// Length of the text in characters (the unit chunk offsets use)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Document metadata carried alongside retrieval results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: String,
    pub title: String,
    pub source_ref: String,
}

/// A document record as it appears in an external corpus definition.
///
/// Every field is optional here so that missing fields are reported as
/// corpus errors instead of opaque deserialization failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, alias = "url", alias = "sourceRef")]
    pub source_ref: Option<String>,

    #[serde(default)]
    pub text: Option<String>,
}

impl From<Document> for DocumentRecord {
    fn from(doc: Document) -> Self {
        Self {
            id: Some(doc.id),
            title: Some(doc.title),
            source_ref: Some(doc.source_ref),
            text: Some(doc.text),
        }
    }
}
