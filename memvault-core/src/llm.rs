//! Strict JSON schemas for LLM-backed calls: per-chunk extraction (Prompt A),
//! cross-chunk canonicalization (Prompt B), and entity adjudication.
//!
//! Every struct here derives `deny_unknown_fields` so a provider that drifts
//! from the contract fails parsing loudly instead of silently dropping
//! fields downstream.

use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextClues {
    pub role: Option<String>,
    pub org: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedEntity {
    pub surface_form: String,
    pub canonical_suggestion: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub context_clues: ContextClues,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub confidence: f64,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedEvidenceSpan {
    pub start_char: usize,
    pub end_char: usize,
    pub quote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedEvent {
    pub category: String,
    pub event_time: Option<String>,
    pub narrative: String,
    pub subject: serde_json::Value,
    pub actors: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<ExtractedEvidenceSpan>,
}

/// Output of Prompt A, run once per chunk. Offsets in `evidence` and on
/// entities are relative to the chunk, not the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptAOutput {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
}

impl PromptAOutput {
    pub fn parse_json(raw: &str) -> Result<Self, LlmError> {
        serde_json::from_str(raw).map_err(|err| LlmError::SchemaViolation(err.to_string()))
    }
}

/// A canonicalized event after Phase B has merged paraphrased duplicates
/// and unioned their evidence spans. Offsets here are document-absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalEvent {
    pub category: String,
    pub event_time: Option<String>,
    pub narrative: String,
    pub subject: serde_json::Value,
    pub actors: serde_json::Value,
    pub confidence: f64,
    pub evidence: Vec<ExtractedEvidenceSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptBOutput {
    pub canonical_events: Vec<CanonicalEvent>,
}

impl PromptBOutput {
    pub fn parse_json(raw: &str) -> Result<Self, LlmError> {
        serde_json::from_str(raw).map_err(|err| LlmError::SchemaViolation(err.to_string()))
    }
}

/// The outcome of an entity-adjudication call. Every call site matches all
/// three arms explicitly rather than treating "uncertain" as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResolutionDecision {
    Same { canonical_name: String, reason: String },
    Different { reason: String },
    Uncertain { reason: String },
}

impl ResolutionDecision {
    pub fn parse_json(raw: &str) -> Result<Self, LlmError> {
        serde_json::from_str(raw).map_err(|err| LlmError::SchemaViolation(err.to_string()))
    }
}

/// Fixed map of known category variants to their canonical singular form.
/// Pass-through for anything not listed here, which is the resolved policy
/// for unrecognized categories (logged by the caller for later inspection).
pub fn normalize_category(raw: &str) -> String {
    match raw {
        "Commitments" => "Commitment".to_string(),
        "Executions" => "Execution".to_string(),
        "Decisions" => "Decision".to_string(),
        "Collaborations" => "Collaboration".to_string(),
        "QualityRisks" => "QualityRisk".to_string(),
        "Feedbacks" => "Feedback".to_string(),
        "Changes" => "Change".to_string(),
        "Stakeholders" => "Stakeholder".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_category_maps_known_plurals() {
        assert_eq!(normalize_category("Commitments"), "Commitment");
        assert_eq!(normalize_category("QualityRisks"), "QualityRisk");
    }

    #[test]
    fn normalize_category_passes_through_unknown() {
        assert_eq!(normalize_category("Milestone"), "Milestone");
    }

    #[test]
    fn resolution_decision_round_trips_all_variants() {
        let same = ResolutionDecision::Same {
            canonical_name: "Jane Doe".to_string(),
            reason: "same email".to_string(),
        };
        let raw = serde_json::to_string(&same).unwrap();
        let parsed = ResolutionDecision::parse_json(&raw).unwrap();
        matches!(parsed, ResolutionDecision::Same { .. });
    }

    #[test]
    fn prompt_a_output_rejects_unknown_fields() {
        let raw = r#"{"entities": [], "events": [], "unexpected": true}"#;
        assert!(PromptAOutput::parse_json(raw).is_err());
    }
}
