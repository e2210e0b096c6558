//! The read path: `Retriever::recall` runs a hybrid vector + graph query, or
//! (when `conversation_id` is given with no query) reads a conversation's
//! turn history straight out of the relational store. Graph expansion
//! degrades gracefully — a storage error there never fails the whole call,
//! it just comes back with `related_context: []` and `degraded: true`.

use memvault_core::errors::{EmbeddingError, ValidationError};
use memvault_core::ids::{is_artifact_id, is_event_id};
use memvault_core::model::{ConversationTurn, Entity, GraphEdgeKind, SemanticEvent};
use memvault_core::traits::{Embedder, VectorHit, VectorIndex, VectorQueryFilter};
use memvault_storage::{MemvaultStore, StorageError};
use thiserror::Error;
use tracing::warn;

pub const CONTENT_COLLECTION: &str = "content";
pub const CHUNKS_COLLECTION: &str = "chunks";

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("recall requires either id, query, or conversation_id")]
    MissingQuery,
    #[error("query length {0} is out of the allowed 2-5000 character range")]
    InvalidQueryLength(usize),
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub max_distance: f64,
    pub rrf_k: usize,
    pub default_graph_filters: Vec<String>,
    pub graph_budget_default: usize,
    pub graph_budget_max: usize,
    pub graph_seed_limit_default: usize,
    pub graph_seed_limit_max: usize,
    pub snippet_chars: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_distance: 0.35,
            rrf_k: 60,
            default_graph_filters: vec!["Decision".to_string(), "Commitment".to_string(), "QualityRisk".to_string()],
            graph_budget_default: 10,
            graph_budget_max: 50,
            graph_seed_limit_default: 1,
            graph_seed_limit_max: 20,
            snippet_chars: 280,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecallRequest {
    pub id: Option<String>,
    pub query: Option<String>,
    pub conversation_id: Option<String>,
    pub limit: usize,
    pub expand: bool,
    pub include_events: bool,
    pub graph_filters: Vec<String>,
    pub filter: VectorQueryFilter,
    /// `None` defers to `RetrieverConfig::graph_budget_default`. `Some(0)`
    /// means "don't expand" and short-circuits to `related_context: []`.
    /// Rejected with `ValidationError::Malformed` if it exceeds
    /// `RetrieverConfig::graph_budget_max`.
    pub graph_budget: Option<usize>,
    /// `None` defers to `RetrieverConfig::graph_seed_limit_default`, clamped
    /// to `RetrieverConfig::graph_seed_limit_max`.
    pub graph_seed_limit: Option<usize>,
}

impl RecallRequest {
    pub fn for_query(query: impl Into<String>) -> Self {
        Self { query: Some(query.into()), limit: 10, ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryResultKind {
    Artifact,
    Chunk,
    Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryResult {
    pub kind: PrimaryResultKind,
    pub artifact_uid: String,
    pub revision_id: String,
    pub chunk_id: Option<String>,
    pub score: f64,
    pub snippet: String,
    pub is_neighbor_context: bool,
}

#[derive(Debug, Clone)]
pub struct RelatedContextItem {
    pub event: SemanticEvent,
    pub entity_id: String,
    pub edge_type: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOptions {
    pub graph_budget_default: usize,
    pub graph_budget_max: usize,
    pub graph_seed_limit_default: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RecallEnvelope {
    pub primary_results: Vec<PrimaryResult>,
    pub related_context: Vec<RelatedContextItem>,
    pub entities: Vec<Entity>,
    pub expand_options: Option<ExpandOptions>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationHistoryResult {
    pub conversation_id: String,
    pub turns: Vec<ConversationTurn>,
    pub total_turns: usize,
}

#[derive(Debug, Clone)]
pub enum RecallOutcome {
    Memories(RecallEnvelope),
    ConversationHistory(ConversationHistoryResult),
}

struct ScoredHit {
    id: String,
    artifact_uid: String,
    chunk_id: Option<String>,
    revision_id: Option<String>,
    rrf_score: f64,
}

pub struct Retriever<'a> {
    store: &'a MemvaultStore,
    vector_index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    config: RetrieverConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a MemvaultStore, vector_index: &'a dyn VectorIndex, embedder: &'a dyn Embedder, config: RetrieverConfig) -> Self {
        Self { store, vector_index, embedder, config }
    }

    pub async fn recall(&self, request: RecallRequest) -> Result<RecallOutcome, RetrieveError> {
        if let Some(graph_budget) = request.graph_budget {
            if graph_budget > self.config.graph_budget_max {
                return Err(ValidationError::Malformed {
                    field: "graph_budget",
                    reason: format!("{graph_budget} exceeds the maximum of {}", self.config.graph_budget_max),
                }
                .into());
            }
        }

        if let Some(conversation_id) = &request.conversation_id {
            if request.query.is_none() {
                let turns = self.store.list_conversation_turns(conversation_id)?;
                return Ok(RecallOutcome::ConversationHistory(ConversationHistoryResult {
                    conversation_id: conversation_id.clone(),
                    total_turns: turns.len(),
                    turns,
                }));
            }
        }

        if let Some(id) = &request.id {
            if is_artifact_id(id) {
                return self.direct_artifact_lookup(id).map(RecallOutcome::Memories);
            }
            if is_event_id(id) {
                return self.direct_event_lookup(id).map(RecallOutcome::Memories);
            }
        }

        let query = request.query.as_deref().ok_or(RetrieveError::MissingQuery)?;
        let query_len = query.chars().count();
        if !(2..=5000).contains(&query_len) {
            return Err(RetrieveError::InvalidQueryLength(query_len));
        }

        let limit = request.limit.max(1);
        let k = limit * 2;
        let query_embedding = self.embedder.embed(query).await?;

        let content_hits = self.vector_index.knn(CONTENT_COLLECTION, &query_embedding, k, &request.filter).await?;
        let chunk_hits = self.vector_index.knn(CHUNKS_COLLECTION, &query_embedding, k, &request.filter).await?;

        let scored = self.fuse_and_dedup(content_hits, chunk_hits);
        let top: Vec<_> = scored.into_iter().take(limit).collect();

        let mut primary_results = self.build_primary_results(&top)?;

        if request.expand {
            self.expand_neighbor_chunks(&mut primary_results)?;
        }

        let graph_budget = request.graph_budget.unwrap_or(self.config.graph_budget_default);
        let graph_seed_limit = request
            .graph_seed_limit
            .unwrap_or(self.config.graph_seed_limit_default)
            .min(self.config.graph_seed_limit_max);

        let (related_context, entities, degraded) = if request.include_events && graph_budget > 0 {
            match self.graph_enrich(&primary_results, &request, graph_budget, graph_seed_limit) {
                Ok((related, entities)) => (related, entities, false),
                Err(err) => {
                    warn!(error = %err, "graph expansion degraded, returning primary results only");
                    (Vec::new(), Vec::new(), true)
                }
            }
        } else {
            (Vec::new(), Vec::new(), false)
        };

        Ok(RecallOutcome::Memories(RecallEnvelope {
            primary_results,
            related_context,
            entities,
            expand_options: Some(ExpandOptions {
                graph_budget_default: self.config.graph_budget_default,
                graph_budget_max: self.config.graph_budget_max,
                graph_seed_limit_default: self.config.graph_seed_limit_default,
            }),
            degraded,
        }))
    }

    fn direct_artifact_lookup(&self, artifact_uid: &str) -> Result<RecallEnvelope, RetrieveError> {
        let mut envelope = RecallEnvelope::default();
        if let Some(revision) = self.store.get_latest_revision(artifact_uid)? {
            envelope.primary_results.push(PrimaryResult {
                kind: PrimaryResultKind::Artifact,
                artifact_uid: revision.artifact_uid,
                revision_id: revision.revision_id,
                chunk_id: None,
                score: 1.0,
                snippet: snippet_of(&revision.content, self.config.snippet_chars),
                is_neighbor_context: false,
            });
        }
        Ok(envelope)
    }

    fn direct_event_lookup(&self, event_id: &str) -> Result<RecallEnvelope, RetrieveError> {
        let mut envelope = RecallEnvelope::default();
        if let Some(event) = self.store.get_event(event_id)? {
            envelope.primary_results.push(PrimaryResult {
                kind: PrimaryResultKind::Event,
                artifact_uid: event.artifact_uid.clone(),
                revision_id: event.revision_id.clone(),
                chunk_id: None,
                score: 1.0,
                snippet: event.narrative.clone(),
                is_neighbor_context: false,
            });
        }
        Ok(envelope)
    }

    /// RRF-fuses the two collections' hit lists, groups by underlying
    /// artifact, sums each group's contributions, then keeps only the
    /// finer-grained chunk entries for a group that has any (dropping the
    /// coarser artifact-level hit), carrying the group's summed score.
    fn fuse_and_dedup(&self, content_hits: Vec<VectorHit>, chunk_hits: Vec<VectorHit>) -> Vec<ScoredHit> {
        let content_hits: Vec<_> = content_hits.into_iter().filter(|h| h.distance <= self.config.max_distance).collect();
        let chunk_hits: Vec<_> = chunk_hits.into_iter().filter(|h| h.distance <= self.config.max_distance).collect();

        let mut entries: Vec<ScoredHit> = Vec::new();
        for (rank, hit) in content_hits.iter().enumerate() {
            entries.push(ScoredHit {
                id: hit.id.clone(),
                artifact_uid: hit.id.clone(),
                chunk_id: None,
                revision_id: hit.metadata.get("revision_id").and_then(|v| v.as_str()).map(str::to_string),
                rrf_score: rrf_contribution(self.config.rrf_k, rank),
            });
        }
        for (rank, hit) in chunk_hits.iter().enumerate() {
            let artifact_uid = hit.metadata.get("artifact_uid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            entries.push(ScoredHit {
                id: hit.id.clone(),
                artifact_uid,
                chunk_id: Some(hit.id.clone()),
                revision_id: hit.metadata.get("revision_id").and_then(|v| v.as_str()).map(str::to_string),
                rrf_score: rrf_contribution(self.config.rrf_k, rank),
            });
        }

        let mut group_scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for entry in &entries {
            *group_scores.entry(entry.artifact_uid.clone()).or_insert(0.0) += entry.rrf_score;
        }

        let has_chunk: std::collections::HashSet<String> =
            entries.iter().filter(|e| e.chunk_id.is_some()).map(|e| e.artifact_uid.clone()).collect();

        let mut winners: Vec<ScoredHit> = entries
            .into_iter()
            .filter(|e| if has_chunk.contains(&e.artifact_uid) { e.chunk_id.is_some() } else { e.chunk_id.is_none() })
            .map(|mut e| {
                e.rrf_score = *group_scores.get(&e.artifact_uid).unwrap_or(&e.rrf_score);
                e
            })
            .collect();

        winners.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal));
        winners
    }

    fn build_primary_results(&self, hits: &[ScoredHit]) -> Result<Vec<PrimaryResult>, RetrieveError> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let revision = match &hit.revision_id {
                Some(revision_id) => self.store.get_revision(&hit.artifact_uid, revision_id)?,
                None => self.store.get_latest_revision(&hit.artifact_uid)?,
            };
            let Some(revision) = revision else { continue };

            let (kind, snippet) = match &hit.chunk_id {
                Some(chunk_id) => {
                    let chunk = self
                        .store
                        .list_chunks(&hit.artifact_uid, &revision.revision_id)?
                        .into_iter()
                        .find(|c| &c.chunk_id == chunk_id);
                    let snippet = chunk
                        .map(|c| revision.content[c.start_char..c.end_char].to_string())
                        .unwrap_or_default();
                    (PrimaryResultKind::Chunk, snippet)
                }
                None => (PrimaryResultKind::Artifact, snippet_of(&revision.content, self.config.snippet_chars)),
            };

            results.push(PrimaryResult {
                kind,
                artifact_uid: hit.artifact_uid.clone(),
                revision_id: revision.revision_id,
                chunk_id: hit.chunk_id.clone(),
                score: hit.rrf_score,
                snippet,
                is_neighbor_context: false,
            });
        }
        Ok(results)
    }

    /// For each chunk hit at index `i`, appends its `i-1`/`i+1` siblings
    /// (when they exist) as neighbor-context entries.
    fn expand_neighbor_chunks(&self, results: &mut Vec<PrimaryResult>) -> Result<(), RetrieveError> {
        let mut additions = Vec::new();
        for result in results.iter() {
            let Some(chunk_id) = &result.chunk_id else { continue };
            let chunks = self.store.list_chunks(&result.artifact_uid, &result.revision_id)?;
            let Some(current) = chunks.iter().find(|c| &c.chunk_id == chunk_id) else { continue };
            for neighbor_index in [current.index.checked_sub(1), Some(current.index + 1)].into_iter().flatten() {
                if let Some(neighbor) = chunks.iter().find(|c| c.index == neighbor_index) {
                    if results.iter().any(|r| r.chunk_id.as_deref() == Some(neighbor.chunk_id.as_str())) {
                        continue;
                    }
                    let revision = self.store.get_revision(&result.artifact_uid, &result.revision_id)?;
                    let snippet = revision.map(|r| r.content[neighbor.start_char..neighbor.end_char].to_string()).unwrap_or_default();
                    additions.push(PrimaryResult {
                        kind: PrimaryResultKind::Chunk,
                        artifact_uid: result.artifact_uid.clone(),
                        revision_id: result.revision_id.clone(),
                        chunk_id: Some(neighbor.chunk_id.clone()),
                        score: 0.0,
                        snippet,
                        is_neighbor_context: true,
                    });
                }
            }
        }
        results.extend(additions);
        Ok(())
    }

    /// Pulls matching events for the primary artifacts (graph seeds), then —
    /// if the caller asked for `expand` — walks one hop out from each seed
    /// via `ACTED_IN`/`ABOUT` to surface related events. `budget` caps the
    /// number of related events returned; `seed_limit` caps how many of the
    /// matched events are used as graph seeds.
    fn graph_enrich(
        &self,
        primary_results: &[PrimaryResult],
        request: &RecallRequest,
        budget: usize,
        seed_limit: usize,
    ) -> Result<(Vec<RelatedContextItem>, Vec<Entity>), RetrieveError> {
        let artifact_uids: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            primary_results.iter().map(|r| r.artifact_uid.clone()).filter(|id| seen.insert(id.clone())).collect()
        };

        let categories = if request.graph_filters.is_empty() { self.config.default_graph_filters.clone() } else { request.graph_filters.clone() };
        let seed_events = self.store.list_events_by_category(&artifact_uids, &categories, 50)?;

        if !request.expand || seed_events.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let seed_limit = seed_limit.max(1);
        let seeds: Vec<&SemanticEvent> = seed_events.iter().take(seed_limit).collect();
        let seed_ids: Vec<String> = seeds.iter().map(|e| e.event_id.clone()).collect();

        let mut related = Vec::new();
        let mut entity_ids = std::collections::HashSet::new();

        for seed in &seeds {
            let edges = self.store.one_hop_neighbors(&seed.event_id, &[GraphEdgeKind::ActedIn, GraphEdgeKind::About], &[])?;
            for edge in edges {
                let entity_id = if edge.to_node_id == seed.event_id { edge.from_node_id } else { edge.to_node_id };
                entity_ids.insert(entity_id);
            }
        }

        'entities: for entity_id in &entity_ids {
            let edges = self.store.one_hop_neighbors(entity_id, &[GraphEdgeKind::ActedIn, GraphEdgeKind::About], &seed_ids)?;
            for edge in edges {
                if related.len() >= budget {
                    break 'entities;
                }
                let event_node_id = if edge.from_node_id == *entity_id { edge.to_node_id } else { edge.from_node_id };
                let Some(event) = self.store.get_event(&event_node_id)? else { continue };
                if !categories.is_empty() && !categories.contains(&event.category) {
                    continue;
                }
                related.push(RelatedContextItem {
                    event,
                    entity_id: entity_id.clone(),
                    edge_type: if edge.kind == GraphEdgeKind::ActedIn { "ACTED_IN" } else { "ABOUT" },
                });
            }
        }

        let mut entities = Vec::new();
        for entity_id in &entity_ids {
            if let Some(entity) = self.store.get_entity(entity_id)? {
                entities.push(entity);
            }
        }

        Ok((related, entities))
    }
}

fn rrf_contribution(k: usize, rank: usize) -> f64 {
    1.0 / (k + rank + 1) as f64
}

fn snippet_of(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_index, _)) => content[..byte_index].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memvault_core::errors::EmbeddingError;
    use memvault_core::model::{ArtifactRevision, ArtifactType, Chunk, PrivacyTags, Provenance};
    use memvault_core::traits::{HealthReport, HealthStatus, VectorRecord};
    use memvault_core::ids::artifact_uid_from_content;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.1, 0.2, 0.3, 0.4])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect())
        }
        async fn health_check(&self) -> HealthReport {
            HealthReport { status: HealthStatus::Healthy, latency_ms: 1 }
        }
    }

    struct StubVectorIndex {
        content: Vec<VectorHit>,
        chunks: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorIndex for StubVectorIndex {
        async fn upsert(&self, _collection: &str, _records: &[VectorRecord]) -> Result<(), EmbeddingError> {
            Ok(())
        }
        async fn delete_by_artifact(&self, _collection: &str, _artifact_uid: &str) -> Result<(), EmbeddingError> {
            Ok(())
        }
        async fn knn(&self, collection: &str, _query: &[f32], _k: usize, _filter: &VectorQueryFilter) -> Result<Vec<VectorHit>, EmbeddingError> {
            Ok(if collection == CONTENT_COLLECTION { self.content.clone() } else { self.chunks.clone() })
        }
    }

    fn seed_revision(store: &mut MemvaultStore, content: &str) -> (String, String) {
        let artifact_uid = artifact_uid_from_content(content);
        let revision_id = memvault_core::ids::revision_id(content);
        let revision = ArtifactRevision {
            artifact_uid: artifact_uid.clone(),
            revision_id: revision_id.clone(),
            artifact_id: artifact_uid.clone(),
            artifact_type: ArtifactType::Note,
            content: content.to_string(),
            content_hash: revision_id.clone(),
            token_count: 20,
            is_chunked: false,
            chunk_count: 0,
            privacy: PrivacyTags::default(),
            provenance: Provenance::default(),
            is_latest: true,
            created_at: chrono::Utc::now(),
        };
        store.upsert_artifact_revision(&revision).unwrap();
        (artifact_uid, revision_id)
    }

    #[tokio::test]
    async fn direct_artifact_lookup_returns_single_result() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        let (artifact_uid, _) = seed_revision(&mut store, "a short note about a project kickoff");
        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex { content: Vec::new(), chunks: Vec::new() };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let mut request = RecallRequest::for_query("irrelevant");
        request.id = Some(artifact_uid.clone());
        request.query = None;

        let outcome = retriever.recall(request).await.unwrap();
        match outcome {
            RecallOutcome::Memories(envelope) => {
                assert_eq!(envelope.primary_results.len(), 1);
                assert_eq!(envelope.primary_results[0].artifact_uid, artifact_uid);
            }
            _ => panic!("expected memories envelope"),
        }
    }

    #[tokio::test]
    async fn conversation_history_mode_skips_embedding() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        let (artifact_uid, revision_id) = seed_revision(&mut store, "hello there, first turn of a chat");
        store
            .record_conversation_turn(&ConversationTurn {
                conversation_id: "conv-9".to_string(),
                turn_index: 0,
                artifact_uid,
                revision_id,
                role: Some("user".to_string()),
                created_at: chrono::Utc::now(),
            })
            .unwrap();

        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex { content: Vec::new(), chunks: Vec::new() };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let request = RecallRequest { conversation_id: Some("conv-9".to_string()), ..Default::default() };
        let outcome = retriever.recall(request).await.unwrap();
        match outcome {
            RecallOutcome::ConversationHistory(history) => {
                assert_eq!(history.total_turns, 1);
                assert_eq!(history.conversation_id, "conv-9");
            }
            _ => panic!("expected conversation history"),
        }
    }

    #[tokio::test]
    async fn query_length_out_of_range_is_rejected() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex { content: Vec::new(), chunks: Vec::new() };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let request = RecallRequest::for_query("x");
        let result = retriever.recall(request).await;
        assert!(matches!(result, Err(RetrieveError::InvalidQueryLength(1))));
    }

    #[tokio::test]
    async fn dedup_prefers_chunk_hit_over_parent_artifact_hit() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        let (artifact_uid, revision_id) = seed_revision(&mut store, "a project note with enough content to chunk nicely");
        let chunk = Chunk {
            chunk_id: format!("{artifact_uid}::chunk::000::abcd1234"),
            artifact_uid: artifact_uid.clone(),
            revision_id: revision_id.clone(),
            index: 0,
            start_char: 0,
            end_char: 10,
            token_count: 2,
            content_hash: "abcd".to_string(),
        };
        store.replace_chunks(&artifact_uid, &revision_id, &[chunk.clone()]).unwrap();

        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex {
            content: vec![VectorHit {
                id: artifact_uid.clone(),
                distance: 0.1,
                metadata: serde_json::json!({ "revision_id": revision_id }),
            }],
            chunks: vec![VectorHit {
                id: chunk.chunk_id.clone(),
                distance: 0.05,
                metadata: serde_json::json!({ "artifact_uid": artifact_uid, "revision_id": revision_id }),
            }],
        };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let request = RecallRequest::for_query("project note");
        let outcome = retriever.recall(request).await.unwrap();
        match outcome {
            RecallOutcome::Memories(envelope) => {
                assert_eq!(envelope.primary_results.len(), 1);
                assert_eq!(envelope.primary_results[0].kind, PrimaryResultKind::Chunk);
            }
            _ => panic!("expected memories envelope"),
        }
    }

    #[tokio::test]
    async fn graph_budget_over_max_is_rejected() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex { content: Vec::new(), chunks: Vec::new() };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let mut request = RecallRequest::for_query("project note");
        request.graph_budget = Some(51);
        let result = retriever.recall(request).await;
        assert!(matches!(result, Err(RetrieveError::Validation(ValidationError::Malformed { field: "graph_budget", .. }))));
    }

    #[tokio::test]
    async fn graph_budget_zero_skips_graph_expansion() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        let (artifact_uid, revision_id) = seed_revision(&mut store, "a short note about a project kickoff");
        let embedder = FixedEmbedder;
        let vector_index = StubVectorIndex {
            content: vec![VectorHit {
                id: artifact_uid.clone(),
                distance: 0.1,
                metadata: serde_json::json!({ "revision_id": revision_id }),
            }],
            chunks: Vec::new(),
        };
        let retriever = Retriever::new(&store, &vector_index, &embedder, RetrieverConfig::default());

        let mut request = RecallRequest::for_query("project kickoff");
        request.include_events = true;
        request.expand = true;
        request.graph_budget = Some(0);
        let outcome = retriever.recall(request).await.unwrap();
        match outcome {
            RecallOutcome::Memories(envelope) => {
                assert!(envelope.related_context.is_empty());
                assert!(!envelope.degraded);
            }
            _ => panic!("expected memories envelope"),
        }
    }
}
