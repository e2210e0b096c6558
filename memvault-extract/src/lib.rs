//! Two-phase event extraction: Prompt A runs once per chunk, Prompt B
//! canonicalizes across chunks into the final event set for a revision.
//!
//! This crate only runs the LLM calls and shapes their output into draft
//! rows; the atomic delete+insert write and the `graph_upsert` enqueue live
//! in `memvault-storage`, and entity resolution (invoked inline with
//! extraction, per the adjudication design) lives in `memvault-resolve`.
//! The worker ties all three together inside one job handler.

use chrono::{DateTime, Utc};
use memvault_core::errors::LlmError;
use memvault_core::llm::{normalize_category, ExtractedEntity, ExtractedEvidenceSpan, PromptAOutput};
use memvault_core::traits::EventExtractorLlm;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("every chunk failed schema validation for prompt A")]
    AllChunksFailed,
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] LlmError),
}

/// A chunk's text plus the document-absolute offset of its first character,
/// so Phase A's chunk-relative spans can be translated to document-absolute
/// ones before Phase B sees them.
pub struct ChunkSlice<'a> {
    pub chunk_id: Option<String>,
    pub start_char: usize,
    pub text: &'a str,
}

#[derive(Debug, Clone)]
pub struct DraftEvidence {
    pub chunk_id: Option<String>,
    pub start_char: usize,
    pub end_char: usize,
    pub quote: String,
}

#[derive(Debug, Clone)]
pub struct DraftEvent {
    pub category: String,
    pub event_time: Option<DateTime<Utc>>,
    pub narrative: String,
    pub subject: serde_json::Value,
    pub actors: serde_json::Value,
    pub confidence: f64,
    pub evidence: Vec<DraftEvidence>,
}

#[derive(Debug, Clone)]
pub struct DraftEntityMention {
    pub surface_form: String,
    pub canonical_suggestion: String,
    pub entity_type: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub aliases: Vec<String>,
    pub confidence: f64,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_id: Option<String>,
}

pub struct ExtractionResult {
    pub events: Vec<DraftEvent>,
    pub entity_mentions: Vec<DraftEntityMention>,
    /// Chunks whose Phase A output failed schema validation; logged by the
    /// caller, not fatal unless every chunk failed.
    pub failed_chunk_ids: Vec<Option<String>>,
}

/// Runs Phase A over every chunk then Phase B over the combined,
/// offset-translated output. A schema violation on an individual chunk is
/// treated as an empty result for that chunk and recorded in
/// `failed_chunk_ids`; the job only fails outright if every chunk fails.
pub async fn extract_revision<L: EventExtractorLlm>(
    llm: &L,
    chunks: &[ChunkSlice<'_>],
) -> Result<ExtractionResult, ExtractError> {
    let mut translated_outputs = Vec::with_capacity(chunks.len());
    let mut entity_mentions = Vec::new();
    let mut failed_chunk_ids = Vec::new();

    for chunk in chunks {
        match llm.extract_chunk(chunk.text).await {
            Ok(output) => {
                let translated = translate_offsets(&output, chunk.start_char);
                for entity in &translated.entities {
                    entity_mentions.push(DraftEntityMention {
                        surface_form: entity.surface_form.clone(),
                        canonical_suggestion: entity.canonical_suggestion.clone(),
                        entity_type: entity.entity_type.clone(),
                        role: entity.context_clues.role.clone(),
                        organization: entity.context_clues.org.clone(),
                        email: entity.context_clues.email.clone(),
                        aliases: entity.aliases.clone(),
                        confidence: entity.confidence,
                        start_char: entity.start_char,
                        end_char: entity.end_char,
                        chunk_id: chunk.chunk_id.clone(),
                    });
                }
                translated_outputs.push(translated);
            }
            Err(_schema_violation) => {
                failed_chunk_ids.push(chunk.chunk_id.clone());
            }
        }
    }

    if translated_outputs.is_empty() && !chunks.is_empty() {
        return Err(ExtractError::AllChunksFailed);
    }

    let canonical = llm.canonicalize(&translated_outputs).await?;

    let events = canonical
        .canonical_events
        .into_iter()
        .map(|event| DraftEvent {
            category: normalize_category(&event.category),
            event_time: event.event_time.as_deref().and_then(parse_loose_timestamp),
            narrative: event.narrative,
            subject: event.subject,
            actors: event.actors,
            confidence: event.confidence.clamp(0.0, 1.0),
            evidence: event
                .evidence
                .into_iter()
                .map(|span| DraftEvidence {
                    chunk_id: None,
                    start_char: span.start_char,
                    end_char: span.end_char,
                    quote: span.quote,
                })
                .collect(),
        })
        .collect();

    Ok(ExtractionResult {
        events,
        entity_mentions,
        failed_chunk_ids,
    })
}

fn translate_offsets(output: &PromptAOutput, chunk_start: usize) -> PromptAOutput {
    PromptAOutput {
        entities: output
            .entities
            .iter()
            .map(|entity| ExtractedEntity {
                start_char: entity.start_char + chunk_start,
                end_char: entity.end_char + chunk_start,
                ..entity.clone()
            })
            .collect(),
        events: output
            .events
            .iter()
            .map(|event| {
                let mut translated = event.clone();
                translated.evidence = event
                    .evidence
                    .iter()
                    .map(|span| ExtractedEvidenceSpan {
                        start_char: span.start_char + chunk_start,
                        end_char: span.end_char + chunk_start,
                        quote: span.quote.clone(),
                    })
                    .collect();
                translated
            })
            .collect(),
    }
}

fn parse_loose_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

pub fn new_extraction_run_id() -> String {
    Uuid::new_v4().to_string()
}
