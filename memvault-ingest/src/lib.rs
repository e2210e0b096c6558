//! The write path: `Ingester::remember` validates, fingerprints, chunks,
//! embeds and writes an artifact revision, then enqueues extraction. Vector
//! writes happen before the relational write commits — the relational row is
//! the source of truth, so a crash between the two leaves orphaned vectors
//! rather than a revision with no embeddings, which is the safer half to get
//! wrong (orphaned vectors are inert until a revision row points at them).

use chrono::Utc;
use memvault_core::errors::ValidationError;
use memvault_core::ids::{artifact_uid_from_content, artifact_uid_from_source, revision_id as derive_revision_id};
use memvault_core::model::{ArtifactRevision, ArtifactType, ConversationTurn, JobType, PrivacyTags, Provenance};
use memvault_core::traits::{Embedder, VectorIndex, VectorRecord};
use memvault_chunk::{chunk as chunk_text, should_chunk, ChunkerConfig};
use memvault_storage::{MemvaultStore, StorageError};
use thiserror::Error;
use tracing::{info, warn};

pub const CONTENT_COLLECTION: &str = "content";
pub const CHUNKS_COLLECTION: &str = "chunks";

const DEFAULT_MIN_CONTENT_BYTES: usize = 1;
const DEFAULT_MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("embedding error: {0}")]
    Embedding(#[from] memvault_core::errors::EmbeddingError),
}

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub chunker: ChunkerConfig,
    pub min_content_bytes: usize,
    pub max_content_bytes: usize,
    pub allowed_contexts: Vec<String>,
    pub event_max_attempts: u32,
    pub short_turn_token_threshold: usize,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            min_content_bytes: DEFAULT_MIN_CONTENT_BYTES,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            allowed_contexts: vec![
                "conversation".to_string(),
                "document".to_string(),
                "email".to_string(),
                "chat".to_string(),
                "transcript".to_string(),
                "note".to_string(),
            ],
            event_max_attempts: 5,
            short_turn_token_threshold: 100,
        }
    }
}

/// Stable source identity, when the caller has one (a Slack message id, an
/// email Message-ID, …). Absent, the artifact is fingerprinted from content
/// alone, so two byte-identical artifacts from different unnamed sources
/// collapse onto the same `artifact_uid`.
#[derive(Debug, Clone)]
pub struct SourceIdentity {
    pub source_system: String,
    pub source_id: String,
}

/// `context="conversation"` requires both fields; `remember` records the
/// turn in the relational store so `recall`'s history mode can read it back
/// in order without an embedding call.
#[derive(Debug, Clone)]
pub struct ConversationRef {
    pub conversation_id: String,
    pub turn_index: i64,
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RememberRequest {
    pub content: String,
    pub context: String,
    pub artifact_type: ArtifactType,
    pub source: Option<SourceIdentity>,
    pub conversation: Option<ConversationRef>,
    pub privacy: PrivacyTags,
    pub title: Option<String>,
    pub author: Option<String>,
    pub participants: Vec<String>,
    pub document_status: Option<String>,
}

impl RememberRequest {
    pub fn new(content: impl Into<String>, context: impl Into<String>, artifact_type: ArtifactType) -> Self {
        Self {
            content: content.into(),
            context: context.into(),
            artifact_type,
            source: None,
            conversation: None,
            privacy: PrivacyTags::default(),
            title: None,
            author: None,
            participants: Vec::new(),
            document_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RememberOutcome {
    pub artifact_uid: String,
    pub revision_id: String,
    pub is_chunked: bool,
    pub num_chunks: usize,
    pub events_queued: bool,
}

pub struct Ingester<'a> {
    store: &'a mut MemvaultStore,
    vector_index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    config: IngesterConfig,
}

impl<'a> Ingester<'a> {
    pub fn new(
        store: &'a mut MemvaultStore,
        vector_index: &'a dyn VectorIndex,
        embedder: &'a dyn Embedder,
        config: IngesterConfig,
    ) -> Self {
        Self { store, vector_index, embedder, config }
    }

    pub async fn remember(&mut self, request: RememberRequest) -> Result<RememberOutcome, IngestError> {
        self.validate(&request)?;

        let artifact_uid = match &request.source {
            Some(source) => artifact_uid_from_source(&source.source_system, &source.source_id),
            None => artifact_uid_from_content(&request.content),
        };
        let content_hash = derive_revision_id(&request.content);
        let revision_id = content_hash.clone();

        if let Some(existing) = self.store.get_revision(&artifact_uid, &revision_id)? {
            if existing.is_latest {
                info!(artifact_uid = %artifact_uid, revision_id = %revision_id, "remember is a no-op, identical latest revision");
                return Ok(RememberOutcome {
                    artifact_uid,
                    revision_id,
                    is_chunked: existing.is_chunked,
                    num_chunks: existing.chunk_count,
                    events_queued: false,
                });
            }
        }

        if let Some(prior) = self.store.get_latest_revision(&artifact_uid)? {
            if prior.revision_id != revision_id {
                warn!(artifact_uid = %artifact_uid, prior_revision = %prior.revision_id, "superseding prior revision");
                self.vector_index.delete_by_artifact(CONTENT_COLLECTION, &artifact_uid).await?;
                self.vector_index.delete_by_artifact(CHUNKS_COLLECTION, &artifact_uid).await?;
                self.store.delete_revision_derived_rows(&artifact_uid, &prior.revision_id)?;
            }
        }

        let token_count = memvault_chunk::token_count(&request.content);
        let is_chunked = should_chunk(&request.content, &self.config.chunker);
        let mut chunks = if is_chunked {
            chunk_text(&request.content, &artifact_uid, &self.config.chunker)
        } else {
            Vec::new()
        };
        for c in &mut chunks {
            c.artifact_uid = artifact_uid.clone();
            c.revision_id = revision_id.clone();
        }

        let content_embedding = self.embedder.embed(&request.content).await?;
        let chunk_embeddings = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks
                .iter()
                .map(|c| request.content[c.start_char..c.end_char].to_string())
                .collect();
            self.embedder.embed_batch(&texts).await?
        };

        let content_record = VectorRecord {
            id: artifact_uid.clone(),
            embedding: content_embedding,
            metadata: serde_json::json!({
                "artifact_uid": artifact_uid,
                "revision_id": revision_id,
                "context": request.context,
                "artifact_type": artifact_type_label(request.artifact_type),
                "is_chunked": is_chunked,
                "chunk_count": chunks.len(),
                "sensitivity": request.privacy.sensitivity,
                "visibility_scope": request.privacy.visibility_scope,
            }),
        };
        self.vector_index.upsert(CONTENT_COLLECTION, &[content_record]).await?;

        if !chunks.is_empty() {
            let chunk_records: Vec<VectorRecord> = chunks
                .iter()
                .zip(chunk_embeddings.into_iter())
                .map(|(c, embedding)| VectorRecord {
                    id: c.chunk_id.clone(),
                    embedding,
                    metadata: serde_json::json!({
                        "artifact_uid": artifact_uid,
                        "revision_id": revision_id,
                        "index": c.index,
                        "start_char": c.start_char,
                        "end_char": c.end_char,
                        "context": request.context,
                    }),
                })
                .collect();
            self.vector_index.upsert(CHUNKS_COLLECTION, &chunk_records).await?;
        }

        let revision = ArtifactRevision {
            artifact_uid: artifact_uid.clone(),
            revision_id: revision_id.clone(),
            artifact_id: artifact_uid.clone(),
            artifact_type: request.artifact_type,
            content: request.content.clone(),
            content_hash,
            token_count,
            is_chunked,
            chunk_count: chunks.len(),
            privacy: request.privacy.clone(),
            provenance: Provenance {
                source_system: request.source.as_ref().map(|s| s.source_system.clone()).unwrap_or_else(|| request.context.clone()),
                title: request.title.clone(),
                author: request.author.clone(),
                participants: request.participants.clone(),
                document_status: request.document_status.clone(),
            },
            is_latest: true,
            created_at: Utc::now(),
        };
        self.store.upsert_artifact_revision(&revision)?;

        if !chunks.is_empty() {
            self.store.replace_chunks(&artifact_uid, &revision_id, &chunks)?;
        }

        let events_queued = if token_count < self.config.short_turn_token_threshold {
            false
        } else {
            self.store
                .enqueue_job(&artifact_uid, &revision_id, JobType::ExtractEvents, self.config.event_max_attempts)?
                .is_some()
        };

        if let Some(conversation) = &request.conversation {
            self.store.record_conversation_turn(&ConversationTurn {
                conversation_id: conversation.conversation_id.clone(),
                turn_index: conversation.turn_index,
                artifact_uid: artifact_uid.clone(),
                revision_id: revision_id.clone(),
                role: conversation.role.clone(),
                created_at: Utc::now(),
            })?;
        }

        Ok(RememberOutcome {
            artifact_uid,
            revision_id,
            is_chunked,
            num_chunks: chunks.len(),
            events_queued,
        })
    }

    fn validate(&self, request: &RememberRequest) -> Result<(), ValidationError> {
        let len = request.content.len();
        if len == 0 {
            return Err(ValidationError::EmptyContent);
        }
        if len < self.config.min_content_bytes || len > self.config.max_content_bytes {
            return Err(ValidationError::ContentTooLarge { max: self.config.max_content_bytes, actual: len });
        }
        if !self.config.allowed_contexts.iter().any(|c| c == &request.context) {
            return Err(ValidationError::Malformed {
                field: "context",
                reason: format!("{:?} is not in the allowed context set", request.context),
            });
        }
        if request.context == "conversation" && request.conversation.is_none() {
            return Err(ValidationError::MissingField("conversation"));
        }
        Ok(())
    }
}

fn artifact_type_label(kind: ArtifactType) -> &'static str {
    match kind {
        ArtifactType::Email => "email",
        ArtifactType::Doc => "doc",
        ArtifactType::Chat => "chat",
        ArtifactType::Transcript => "transcript",
        ArtifactType::Note => "note",
    }
}
