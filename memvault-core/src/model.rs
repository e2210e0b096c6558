//! Domain types shared by every crate in the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Email,
    Doc,
    Chat,
    Transcript,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyTags {
    pub sensitivity: String,
    pub visibility_scope: String,
    pub retention_policy: String,
}

impl Default for PrivacyTags {
    fn default() -> Self {
        Self {
            sensitivity: "standard".to_string(),
            visibility_scope: "private".to_string(),
            retention_policy: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub source_system: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub participants: Vec<String>,
    pub document_status: Option<String>,
}

/// An immutable snapshot of ingested content. Never mutated after insert
/// except for `is_latest` demotion when a newer revision of the same
/// `artifact_uid` arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRevision {
    pub artifact_uid: String,
    pub revision_id: String,
    pub artifact_id: String,
    pub artifact_type: ArtifactType,
    pub content: String,
    pub content_hash: String,
    pub token_count: usize,
    pub is_chunked: bool,
    pub chunk_count: usize,
    pub privacy: PrivacyTags,
    pub provenance: Provenance,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
}

/// A deterministic slice of an artifact's text, produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub token_count: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ExtractEvents,
    GraphUpsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// A queued unit of background work keyed by the artifact revision it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJob {
    pub job_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A quoted span of source text that supports a [`SemanticEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEvidence {
    pub evidence_id: String,
    pub event_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub chunk_id: Option<String>,
    pub start_char: usize,
    pub end_char: usize,
    pub quote: String,
}

/// A canonicalized event extracted from one artifact revision. The set of
/// events for a given `(artifact_uid, revision_id)` is replaced atomically on
/// every successful extraction run, never appended to incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEvent {
    pub event_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub category: String,
    pub event_time: Option<DateTime<Utc>>,
    pub narrative: String,
    pub subject_json: serde_json::Value,
    pub actors_json: serde_json::Value,
    pub confidence: f64,
    pub extraction_run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Org,
    Project,
    Object,
    Place,
    Other,
}

/// A canonical entity in the registry, deduplicated across mentions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub normalized_name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub context_embedding: Option<Vec<f32>>,
    pub first_seen_artifact_uid: String,
    pub first_seen_revision_id: String,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub entity_id: String,
    pub alias: String,
    pub normalized_alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub mention_id: String,
    pub entity_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub surface_form: String,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventActor {
    pub event_id: String,
    pub entity_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubject {
    pub event_id: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNodeKind {
    Entity,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub kind: GraphNodeKind,
    pub properties: serde_json::Value,
    /// `{artifact_uid}::{revision_id}` for nodes scoped to one extraction
    /// run (Event nodes); `None` for nodes that persist across revisions
    /// (Entity nodes), which the graph materializer never deletes.
    pub revision_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphEdgeKind {
    ActedIn,
    About,
    PossiblySame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub edge_id: String,
    pub kind: GraphEdgeKind,
    pub from_node_id: String,
    pub to_node_id: String,
    pub properties: serde_json::Value,
    /// Same convention as [`GraphNode::revision_key`]: set for `ACTED_IN`/
    /// `ABOUT` edges (replaced wholesale on re-extraction), `None` for
    /// `POSSIBLY_SAME` edges (persist until an operator resolves them).
    pub revision_key: Option<String>,
}

/// One turn of a conversation, pointing at the artifact revision `remember`
/// stored for it. Lets `recall`'s conversation-history mode read turns back
/// in order without going through the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub turn_index: i64,
    pub artifact_uid: String,
    pub revision_id: String,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Builds the `{artifact_uid}::{revision_id}` key graph rows use to scope
/// themselves to one extraction run.
pub fn revision_key(artifact_uid: &str, revision_id: &str) -> String {
    format!("{artifact_uid}::{revision_id}")
}

/// Normalizes a surface form into its lookup key: lowercase, collapsed
/// interior whitespace, trimmed.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_name("  Jane   Doe "), "jane doe");
    }
}
