//! LLM-backed agent: extraction and generation through a chat model that
//! answers in JSON.

use crate::agent::ClinicalAgent;
use crate::inference::{normalize_json_payload, ChatClient};
use crate::retriever::Evidence;
use crate::{AgentError, Result};
use async_trait::async_trait;
use healthguard_core::chunk::document_id_of;
use healthguard_core::{Citation, Confidence, DiagnosisItem, Finding, FindingCategory, FindingEntry};
use serde_json::Value;
use tracing::{debug, instrument};

const EXTRACT_SYSTEM: &str = "You are a clinical NLP system. Extract all clinical findings from the \
clinical note. Return ONLY a JSON object with the keys \"symptoms\", \"demographics\" and \
\"risk_factors\". Each is an array of objects with keys \"name\", \"value\" (string or null) and \
\"context\" (the sentence it appeared in). Symptoms include signs and exam findings; demographics \
include age and sex. No other text.";

const GENERATE_SYSTEM: &str = "You are a clinical decision support system. Based on the patient \
findings and the numbered literature excerpts, produce a ranked differential diagnosis. Return ONLY \
a JSON object {\"diagnoses\": [{\"condition\": string, \"rationale\": string, \"confidence\": \
\"High\" | \"Moderate\" | \"Low\", \"citations\": [chunk id, ...]}]} ordered from most to least \
likely. Every condition must cite at least one chunk id, copied exactly from the excerpts \
provided. Never cite anything else.";

/// Agent that delegates both steps to a chat model
#[derive(Clone)]
pub struct LlmAgent {
    client: ChatClient,
    name: String,
}

impl LlmAgent {
    pub fn new(client: ChatClient) -> Self {
        let name = format!("llm:{}", client.model());
        Self { client, name }
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }
}

#[async_trait]
impl ClinicalAgent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, note), fields(agent = %self.name))]
    async fn extract(&self, note: &str) -> Result<Finding> {
        let raw = self.client.complete_json(EXTRACT_SYSTEM, note).await?;
        parse_finding(&normalize_json_payload(&raw))
    }

    #[instrument(skip(self, finding, evidence), fields(agent = %self.name, evidence = evidence.len()))]
    async fn generate(&self, finding: &Finding, evidence: &[Evidence]) -> Result<Vec<DiagnosisItem>> {
        let findings_json = serde_json::to_string_pretty(finding)
            .map_err(|e| AgentError::Generation(format!("could not encode findings: {}", e)))?;
        let literature = evidence
            .iter()
            .map(|e| format!("[Chunk: {}] (Source: {})\n{}", e.chunk_id(), e.title, e.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!(
            "## Patient Findings\n{}\n\n## Retrieved Medical Literature\n{}",
            findings_json, literature
        );

        let raw = self.client.complete_json(GENERATE_SYSTEM, &prompt).await?;
        parse_diagnosis(&normalize_json_payload(&raw), evidence)
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_entry(item: &Value) -> Option<FindingEntry> {
    match item {
        Value::String(name) => {
            let name = name.trim();
            (!name.is_empty()).then(|| FindingEntry::new(name))
        }
        Value::Object(obj) => {
            let name = obj
                .get("name")
                .or_else(|| obj.get("finding"))
                .and_then(value_to_string)?;
            let mut entry = FindingEntry::new(name);
            if let Some(value) = obj.get("value").and_then(value_to_string) {
                entry = entry.with_value(value);
            }
            if let Some(context) = obj.get("context").and_then(value_to_string) {
                entry = entry.with_context(context);
            }
            Some(entry)
        }
        _ => None,
    }
}

/// Lenient reading of the extraction reply: entries may be bare strings and
/// values may be numbers.
pub fn parse_finding(payload: &str) -> Result<Finding> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| AgentError::InvalidOutput(format!("{} ({})", payload, e)))?;
    if !value.is_object() {
        return Err(AgentError::InvalidOutput(format!("expected a JSON object: {}", payload)));
    }

    let mut finding = Finding::new();
    for (key, category) in [
        ("symptoms", FindingCategory::Symptom),
        ("demographics", FindingCategory::Demographic),
        ("risk_factors", FindingCategory::RiskFactor),
    ] {
        let items = value.get(key).and_then(|v| v.as_array());
        for entry in items.into_iter().flatten().filter_map(parse_entry) {
            finding.push(category, entry);
        }
    }

    debug!("Parsed {} findings from model output", finding.len());
    Ok(finding)
}

/// Read the generation reply into ranked items.
///
/// Cited chunk ids are resolved to their document through `evidence`; ids
/// the model invented are kept as-is so the validator can flag them.
pub fn parse_diagnosis(payload: &str, evidence: &[Evidence]) -> Result<Vec<DiagnosisItem>> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| AgentError::InvalidOutput(format!("{} ({})", payload, e)))?;
    let diagnoses = value
        .get("diagnoses")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AgentError::InvalidOutput(format!("missing `diagnoses` array: {}", payload)))?;

    let mut items = Vec::with_capacity(diagnoses.len());
    for entry in diagnoses {
        let Some(condition) = entry
            .get("condition")
            .or_else(|| entry.get("condition_name"))
            .and_then(value_to_string)
        else {
            continue;
        };

        let mut item = DiagnosisItem::new(condition, items.len() + 1);
        if let Some(rationale) = entry.get("rationale").and_then(value_to_string) {
            item = item.with_rationale(rationale);
        }
        if let Some(confidence) = entry
            .get("confidence")
            .and_then(|v| v.as_str())
            .and_then(Confidence::parse)
        {
            item = item.with_confidence(confidence);
        }

        let cited = entry.get("citations").and_then(|v| v.as_array());
        for chunk_id in cited.into_iter().flatten().filter_map(value_to_string) {
            let document_id = evidence
                .iter()
                .find(|e| e.chunk_id() == chunk_id)
                .map(|e| e.document_id().to_string())
                .or_else(|| document_id_of(&chunk_id).map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            item = item.cite(Citation::new(chunk_id, document_id));
        }

        items.push(item);
    }

    Ok(items)
}
