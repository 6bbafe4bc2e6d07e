//! Rule-based agent: vocabulary extraction and a keyword condition table.
//! Needs no model or network.

use crate::agent::ClinicalAgent;
use crate::retriever::Evidence;
use crate::Result;
use async_trait::async_trait;
use healthguard_core::{Confidence, DiagnosisItem, Finding, FindingCategory, FindingEntry};
use std::collections::HashSet;
use tracing::debug;

/// Most conditions emitted in one differential
pub const MAX_CONDITIONS: usize = 7;

/// Most citations attached to one condition
pub const MAX_CITATIONS: usize = 3;

/// Keyword-matched supporting chunks when no chunk comes from the condition's article
const MAX_KEYWORD_EVIDENCE: usize = 2;

const SYMPTOMS: &[&str] = &[
    "fever", "cough", "dyspnea", "shortness of breath", "chest pain",
    "pleuritic chest pain", "chest tightness", "wheezing", "hemoptysis", "sputum",
    "orthopnea", "paroxysmal nocturnal dyspnea", "palpitations",
    "edema", "leg swelling", "lower extremity edema", "fatigue",
    "weight loss", "weight gain", "nausea", "vomiting", "diarrhea",
    "abdominal pain", "headache", "dizziness", "syncope", "confusion",
    "altered mental status", "diaphoresis", "night sweats",
    "polyuria", "polydipsia", "blurred vision",
    "anosmia", "ageusia", "myalgia", "joint pain", "back pain",
    "rash", "pruritus", "dysuria", "hematuria", "oliguria",
    "anorexia", "tachycardia", "tachypnea", "hypotension",
    "hypertension", "hypoxemia", "hypoxia", "crackles", "rales",
    "jugular venous distension", "murmur", "gallop",
    "hemiparesis", "aphasia", "ataxia", "vertigo", "diplopia",
];

const RISK_FACTORS: &[&str] = &[
    "smoking", "smoker", "diabetes", "diabetic", "hypertensive",
    "obese", "obesity", "alcohol", "sedentary",
    "immunosuppressed", "immunocompromised",
];

const DEMOGRAPHIC_TERMS: &[&str] = &["elderly"];

struct Condition {
    name: &'static str,
    keywords: &'static [&'static str],
    description: &'static str,
    /// Substring of the document ids that discuss this condition
    article_key: &'static str,
}

const CONDITIONS: &[Condition] = &[
    Condition {
        name: "Community-Acquired Pneumonia (CAP)",
        keywords: &[
            "fever", "cough", "dyspnea", "shortness of breath", "pleuritic chest pain",
            "sputum", "tachypnea", "tachycardia", "crackles", "rales",
        ],
        description: "Infection of the lung parenchyma presenting with respiratory symptoms and systemic inflammation.",
        article_key: "pneumonia",
    },
    Condition {
        name: "Acute Heart Failure / Decompensated Heart Failure",
        keywords: &[
            "dyspnea", "shortness of breath", "orthopnea", "paroxysmal nocturnal dyspnea",
            "edema", "lower extremity edema", "leg swelling", "fatigue", "crackles", "rales",
            "jugular venous distension", "gallop", "tachycardia", "weight gain",
        ],
        description: "Inability of the heart to pump adequately, causing fluid overload and congestion.",
        article_key: "heart_failure",
    },
    Condition {
        name: "Acute Coronary Syndrome (ACS)",
        keywords: &[
            "chest pain", "diaphoresis", "nausea", "dyspnea", "shortness of breath",
            "palpitations", "syncope", "tachycardia", "hypertension", "hypotension",
            "diabetes", "diabetic", "smoking", "smoker",
        ],
        description: "Spectrum including unstable angina, NSTEMI, and STEMI due to coronary artery occlusion.",
        article_key: "acute_coronary",
    },
    Condition {
        name: "COPD Exacerbation",
        keywords: &[
            "cough", "dyspnea", "shortness of breath", "wheezing", "sputum", "smoking",
            "smoker", "tachypnea", "hypoxemia", "hypoxia",
        ],
        description: "Acute worsening of COPD symptoms beyond normal day-to-day variation.",
        article_key: "copd",
    },
    Condition {
        name: "Asthma Exacerbation",
        keywords: &[
            "wheezing", "cough", "dyspnea", "shortness of breath", "chest tightness",
            "tachypnea", "tachycardia", "hypoxemia",
        ],
        description: "Acute worsening of airway inflammation and bronchospasm.",
        article_key: "asthma",
    },
    Condition {
        name: "Pulmonary Embolism (PE)",
        keywords: &[
            "dyspnea", "shortness of breath", "pleuritic chest pain", "chest pain",
            "tachycardia", "tachypnea", "hemoptysis", "hypoxemia", "hypoxia", "syncope",
            "hypotension", "leg swelling", "edema",
        ],
        description: "Obstruction of pulmonary vasculature by thrombus, typically from DVT.",
        article_key: "pulmonary_embolism",
    },
    Condition {
        name: "Sepsis",
        keywords: &[
            "fever", "tachycardia", "tachypnea", "hypotension", "confusion",
            "altered mental status", "dyspnea", "shortness of breath", "cough", "dysuria",
            "abdominal pain", "hypoxemia",
        ],
        description: "Life-threatening organ dysfunction from dysregulated host response to infection.",
        article_key: "sepsis",
    },
    Condition {
        name: "Acute Ischemic Stroke",
        keywords: &[
            "hemiparesis", "aphasia", "confusion", "altered mental status", "headache",
            "dizziness", "vertigo", "ataxia", "diplopia", "hypertension", "hypertensive",
            "diabetes", "diabetic",
        ],
        description: "Acute cerebrovascular occlusion causing neurological deficits.",
        article_key: "stroke",
    },
    Condition {
        name: "Type 2 Diabetes - Acute Complications",
        keywords: &[
            "polyuria", "polydipsia", "weight loss", "fatigue", "blurred vision", "nausea",
            "vomiting", "confusion", "diabetes", "diabetic", "obese", "obesity",
        ],
        description: "Hyperglycemic emergencies (DKA/HHS) or symptomatic uncontrolled diabetes.",
        article_key: "diabetes",
    },
    Condition {
        name: "COVID-19",
        keywords: &[
            "fever", "cough", "fatigue", "myalgia", "headache", "anosmia", "ageusia",
            "dyspnea", "shortness of breath", "hypoxemia", "hypoxia", "diarrhea",
        ],
        description: "SARS-CoV-2 infection ranging from mild to critical illness.",
        article_key: "covid",
    },
];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Whole-word phrase match over pre-split words
fn contains_phrase(haystack: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty()
        && haystack
            .windows(phrase.len())
            .any(|window| window.iter().zip(phrase).all(|(a, b)| a == b))
}

/// Split after `.`, `!` or `?` when followed by whitespace
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next, n)) = chars.peek() {
                if n.is_whitespace() {
                    out.push(text[start..next].trim());
                    start = next;
                }
            }
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

struct Note<'a> {
    words: Vec<String>,
    sentences: Vec<(&'a str, Vec<String>)>,
}

impl<'a> Note<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            words: words(text),
            sentences: sentences(text).into_iter().map(|s| (s, words(s))).collect(),
        }
    }

    /// The first sentence containing `phrase`
    fn sentence_with(&self, phrase: &[String]) -> Option<&'a str> {
        self.sentences
            .iter()
            .find(|(_, words)| contains_phrase(words, phrase))
            .map(|(sentence, _)| *sentence)
    }

    fn entry(&self, name: &str, phrase: &[String]) -> FindingEntry {
        let entry = FindingEntry::new(name);
        match self.sentence_with(phrase) {
            Some(sentence) => entry.with_context(sentence),
            None => entry,
        }
    }

    /// Age from "<n> year old" / "<n>-years-old"
    fn age(&self) -> Option<FindingEntry> {
        self.words.windows(3).find_map(|w| {
            let is_number = (1..=3).contains(&w[0].len()) && w[0].bytes().all(|b| b.is_ascii_digit());
            if is_number && (w[1] == "year" || w[1] == "years") && w[2] == "old" {
                Some(self.entry("age", w).with_value(w[0].clone()))
            } else {
                None
            }
        })
    }

    fn first_word(&self, candidates: &[&str]) -> Option<Vec<String>> {
        candidates
            .iter()
            .map(|word| vec![word.to_string()])
            .find(|phrase| contains_phrase(&self.words, phrase))
    }

    fn sex(&self) -> Option<FindingEntry> {
        let (value, phrase) = if let Some(phrase) = self.first_word(&["male", "man"]) {
            ("male", phrase)
        } else {
            ("female", self.first_word(&["female", "woman"])?)
        };
        Some(self.entry("sex", &phrase).with_value(value))
    }
}

/// Offline agent backed by fixed vocabularies and a condition table
#[derive(Debug, Clone, Default)]
pub struct RuleBasedAgent;

impl RuleBasedAgent {
    pub fn new() -> Self {
        Self
    }

    /// Extract findings synchronously
    pub fn extract_findings(&self, note: &str) -> Finding {
        let note = Note::new(note);
        let mut finding = Finding::new();

        if let Some(age) = note.age() {
            finding.push(FindingCategory::Demographic, age);
        }
        if let Some(sex) = note.sex() {
            finding.push(FindingCategory::Demographic, sex);
        }

        let vocabulary = SYMPTOMS
            .iter()
            .map(|t| (FindingCategory::Symptom, *t))
            .chain(DEMOGRAPHIC_TERMS.iter().map(|t| (FindingCategory::Demographic, *t)))
            .chain(RISK_FACTORS.iter().map(|t| (FindingCategory::RiskFactor, *t)));

        for (category, term) in vocabulary {
            let phrase = words(term);
            if contains_phrase(&note.words, &phrase) {
                finding.push(category, note.entry(term, &phrase));
            }
        }

        debug!("Rule-based extraction found {} entries", finding.len());
        finding
    }

    /// Rank conditions by keyword overlap and attach supporting evidence
    pub fn rank_conditions(&self, finding: &Finding, evidence: &[Evidence]) -> Vec<DiagnosisItem> {
        let terms: HashSet<String> = finding.terms().into_iter().collect();

        let mut scored = Vec::new();
        for condition in CONDITIONS {
            let matched: Vec<&str> = condition
                .keywords
                .iter()
                .copied()
                .filter(|kw| terms.contains(*kw))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let mut supporting: Vec<&Evidence> = evidence
                .iter()
                .filter(|e| e.document_id().to_lowercase().contains(condition.article_key))
                .collect();
            if supporting.is_empty() {
                supporting = evidence
                    .iter()
                    .filter(|e| {
                        let text = e.text.to_lowercase();
                        matched.iter().any(|kw| text.contains(kw))
                    })
                    .take(MAX_KEYWORD_EVIDENCE)
                    .collect();
            }
            supporting.truncate(MAX_CITATIONS);

            scored.push((condition, matched, supporting));
        }

        // Stable sort: table order breaks ties
        scored.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        scored
            .into_iter()
            .take(MAX_CONDITIONS)
            .enumerate()
            .map(|(i, (condition, matched, supporting))| {
                let rationale = format!(
                    "{} Matching findings: {} ({}/{} key findings).",
                    condition.description,
                    matched.join(", "),
                    matched.len(),
                    condition.keywords.len()
                );
                supporting.iter().fold(
                    DiagnosisItem::new(condition.name, i + 1)
                        .with_rationale(rationale)
                        .with_confidence(Confidence::from_ratio(matched.len(), condition.keywords.len())),
                    |item, e| item.cite(e.citation()),
                )
            })
            .collect()
    }
}

#[async_trait]
impl ClinicalAgent for RuleBasedAgent {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn extract(&self, note: &str) -> Result<Finding> {
        Ok(self.extract_findings(note))
    }

    async fn generate(&self, finding: &Finding, evidence: &[Evidence]) -> Result<Vec<DiagnosisItem>> {
        Ok(self.rank_conditions(finding, evidence))
    }
}
