//! Finding types - structured clinical information extracted from a note

use serde::{Deserialize, Serialize};

/// Category a clinical finding belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Symptom or examination sign
    Symptom,
    /// Age, sex and similar attributes
    Demographic,
    /// Comorbidity or exposure
    RiskFactor,
}

impl std::fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symptom => write!(f, "symptom"),
            Self::Demographic => write!(f, "demographic"),
            Self::RiskFactor => write!(f, "risk factor"),
        }
    }
}

/// One extracted item, e.g. `fever`, or `age` with value `45`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Sentence of the note the entry was found in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl FindingEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            context: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Structured extraction of one clinical note.
///
/// Owned by a single pipeline run. The order of entries inside each list is
/// the order the extractor produced them in, and is preserved in the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    #[serde(default)]
    pub symptoms: Vec<FindingEntry>,

    #[serde(default)]
    pub demographics: Vec<FindingEntry>,

    #[serde(default)]
    pub risk_factors: Vec<FindingEntry>,
}

impl Finding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a symptom or sign
    pub fn with_symptom(mut self, entry: FindingEntry) -> Self {
        self.symptoms.push(entry);
        self
    }

    /// Builder: add a demographic attribute
    pub fn with_demographic(mut self, entry: FindingEntry) -> Self {
        self.demographics.push(entry);
        self
    }

    /// Builder: add a risk factor
    pub fn with_risk_factor(mut self, entry: FindingEntry) -> Self {
        self.risk_factors.push(entry);
        self
    }

    pub fn push(&mut self, category: FindingCategory, entry: FindingEntry) {
        match category {
            FindingCategory::Symptom => self.symptoms.push(entry),
            FindingCategory::Demographic => self.demographics.push(entry),
            FindingCategory::RiskFactor => self.risk_factors.push(entry),
        }
    }

    /// All entries in query order: symptoms, demographics, risk factors
    pub fn entries(&self) -> impl Iterator<Item = (FindingCategory, &FindingEntry)> {
        self.symptoms
            .iter()
            .map(|e| (FindingCategory::Symptom, e))
            .chain(self.demographics.iter().map(|e| (FindingCategory::Demographic, e)))
            .chain(self.risk_factors.iter().map(|e| (FindingCategory::RiskFactor, e)))
    }

    pub fn len(&self) -> usize {
        self.symptoms.len() + self.demographics.len() + self.risk_factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The retrieval query for this finding.
    ///
    /// Entries contribute their name followed by their value (when present),
    /// in [`Finding::entries`] order, separated by single spaces.
    pub fn query_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.len() * 2);
        for (_, entry) in self.entries() {
            parts.push(entry.name.trim());
            if let Some(value) = entry.value.as_deref() {
                parts.push(value.trim());
            }
        }
        parts.retain(|part| !part.is_empty());
        parts.join(" ")
    }

    /// Lowercased names and values, used for keyword matching
    pub fn terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        for (_, entry) in self.entries() {
            terms.push(entry.name.to_lowercase());
            if let Some(value) = &entry.value {
                terms.push(value.to_lowercase());
            }
        }
        terms
    }
}
