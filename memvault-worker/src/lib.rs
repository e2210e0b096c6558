//! The worker plane: a poll loop that claims one job at a time by type,
//! runs the matching pipeline, and reports back. Workers are fungible — no
//! file lock or lease, unlike the teacher's detached single-owner runtime —
//! because `claim_job_by_type`'s skip-locked-equivalent `UPDATE ... WHERE
//! status = 'PENDING'` already makes concurrent claims safe by construction.
//!
//! Entity resolution can call out to an LLM and an embedder, so it is never
//! done inside the same SQLite transaction as the event write: the pipeline
//! resolves entities first (each resolution step auto-commits), then writes
//! the revision's event set atomically via `replace_semantic_events`, then
//! links the resolved actor/subject rows. Only the event row set itself is
//! atomic; the surrounding steps are ordered, not wrapped in one BEGIN/COMMIT.

use std::time::Duration;

use memvault_core::model::{EntityType, EventEvidence, EventJob, JobType, SemanticEvent};
use memvault_core::traits::{Embedder, EntityAdjudicatorLlm, EventExtractorLlm};
use memvault_extract::{extract_revision, ChunkSlice, ExtractError};
use memvault_graph::{GraphError, GraphMaterializer};
use memvault_resolve::{EntityResolver, MentionInput, ResolveError, ResolverConfig};
use memvault_storage::{MemvaultStore, StorageError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("graph materialization error: {0}")]
    Graph(#[from] GraphError),
    #[error("job {0} references a revision that no longer exists")]
    RevisionNotFound(String),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub orphan_reap_threshold_secs: i64,
    pub resolver: ResolverConfig,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval: Duration::from_secs(1),
            orphan_reap_threshold_secs: 300,
            resolver: ResolverConfig::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerTickReport {
    pub orphans_reaped: usize,
    pub claimed_job_type: Option<&'static str>,
    pub job_succeeded: bool,
}

pub struct Worker<'a, X: EventExtractorLlm, A: EntityAdjudicatorLlm> {
    store: &'a mut MemvaultStore,
    extractor_llm: &'a X,
    adjudicator: Option<&'a A>,
    embedder: &'a dyn Embedder,
    config: WorkerConfig,
}

impl<'a, X: EventExtractorLlm, A: EntityAdjudicatorLlm> Worker<'a, X, A> {
    pub fn new(
        store: &'a mut MemvaultStore,
        extractor_llm: &'a X,
        adjudicator: Option<&'a A>,
        embedder: &'a dyn Embedder,
        config: WorkerConfig,
    ) -> Self {
        Self { store, extractor_llm, adjudicator, embedder, config }
    }

    /// Runs `interval`-spaced ticks until `shutdown` resolves. Each empty
    /// tick still reaps orphaned `PROCESSING` jobs, so a crashed worker's
    /// leftovers get picked up by whoever polls next.
    pub async fn run_forever(&mut self, shutdown: impl std::future::Future<Output = ()>) -> Result<(), WorkerError> {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => {
                            if report.claimed_job_type.is_some() {
                                info!(worker_id = %self.config.worker_id, job_type = report.claimed_job_type, succeeded = report.job_succeeded, "processed job");
                            }
                        }
                        Err(err) => warn!(worker_id = %self.config.worker_id, error = %err, "tick failed"),
                    }
                }
                _ = &mut shutdown => return Ok(()),
            }
        }
    }

    /// Claims and processes at most one job: `extract_events` first, then
    /// `graph_upsert` if nothing was pending. Returns immediately (no job
    /// claimed) if the queue is empty.
    pub async fn run_once(&mut self) -> Result<WorkerTickReport, WorkerError> {
        let mut report = WorkerTickReport::default();
        report.orphans_reaped = self.store.reap_orphaned(self.config.orphan_reap_threshold_secs)?;

        if let Some(job) = self.store.claim_job_by_type(&self.config.worker_id, JobType::ExtractEvents)? {
            report.claimed_job_type = Some("extract_events");
            let outcome = self.process_extract_events(job.clone()).await;
            report.job_succeeded = self.finish_job(&job, outcome);
            return Ok(report);
        }

        if let Some(job) = self.store.claim_job_by_type(&self.config.worker_id, JobType::GraphUpsert)? {
            report.claimed_job_type = Some("graph_upsert");
            let outcome = self.process_graph_upsert(job.clone()).await;
            report.job_succeeded = self.finish_job(&job, outcome);
            return Ok(report);
        }

        Ok(report)
    }

    fn finish_job(&mut self, job: &EventJob, outcome: Result<(), WorkerError>) -> bool {
        match outcome {
            Ok(()) => {
                if let Err(err) = self.store.mark_done(&job.job_id) {
                    warn!(job_id = %job.job_id, error = %err, "failed to mark job done");
                }
                true
            }
            Err(err) => {
                warn!(job_id = %job.job_id, error = %err, "job failed");
                if let Err(mark_err) = self.store.mark_failed(&job.job_id, &err.to_string(), true) {
                    warn!(job_id = %job.job_id, error = %mark_err, "failed to record job failure");
                }
                false
            }
        }
    }

    async fn process_extract_events(&mut self, job: EventJob) -> Result<(), WorkerError> {
        let revision = self
            .store
            .get_revision(&job.artifact_uid, &job.revision_id)?
            .ok_or_else(|| WorkerError::RevisionNotFound(job.job_id.clone()))?;
        let chunk_rows = self.store.list_chunks(&job.artifact_uid, &job.revision_id)?;

        let slices: Vec<ChunkSlice<'_>> = chunk_rows
            .iter()
            .map(|c| ChunkSlice {
                chunk_id: Some(c.chunk_id.clone()),
                start_char: c.start_char,
                text: &revision.content[c.start_char..c.end_char],
            })
            .collect();

        let extraction = extract_revision(self.extractor_llm, &slices).await?;
        for failed in &extraction.failed_chunk_ids {
            warn!(artifact_uid = %job.artifact_uid, revision_id = %job.revision_id, chunk_id = ?failed, "chunk failed schema validation");
        }

        let mut rows: Vec<(SemanticEvent, Vec<EventEvidence>, serde_json::Value, serde_json::Value)> = Vec::new();

        {
            let mut resolver = EntityResolver::new(self.config.resolver, self.store, self.embedder, self.adjudicator);
            for mention in &extraction.entity_mentions {
                let input = to_mention_input(&job.artifact_uid, &job.revision_id, mention);
                resolver.resolve(&input).await?;
            }

            for event in &extraction.events {
                let event_id = format!("evt_{}", Uuid::new_v4().simple());
                let semantic_event = SemanticEvent {
                    event_id: event_id.clone(),
                    artifact_uid: job.artifact_uid.clone(),
                    revision_id: job.revision_id.clone(),
                    category: event.category.clone(),
                    event_time: event.event_time,
                    narrative: event.narrative.clone(),
                    subject_json: event.subject.clone(),
                    actors_json: event.actors.clone(),
                    confidence: event.confidence,
                    extraction_run_id: memvault_extract::new_extraction_run_id(),
                };
                let evidence = event
                    .evidence
                    .iter()
                    .map(|span| EventEvidence {
                        evidence_id: format!("evd_{}", Uuid::new_v4().simple()),
                        event_id: event_id.clone(),
                        artifact_uid: job.artifact_uid.clone(),
                        revision_id: job.revision_id.clone(),
                        chunk_id: span.chunk_id.clone(),
                        start_char: span.start_char,
                        end_char: span.end_char,
                        quote: span.quote.clone(),
                    })
                    .collect();
                rows.push((semantic_event, evidence, event.actors.clone(), event.subject.clone()));
            }

            let actor_links: Vec<(String, Vec<(String, String)>)> = rows
                .iter()
                .map(|(event, _, actors, _)| (event.event_id.clone(), surface_forms_with_role(actors, &resolver)))
                .collect();
            let subject_links: Vec<(String, Vec<String>)> = rows
                .iter()
                .map(|(event, _, _, subject)| (event.event_id.clone(), surface_forms(subject, &resolver)))
                .collect();

            let event_rows: Vec<(SemanticEvent, Vec<EventEvidence>)> =
                rows.into_iter().map(|(event, evidence, _, _)| (event, evidence)).collect();
            self.store.replace_semantic_events(&job.artifact_uid, &job.revision_id, &event_rows)?;

            for (event_id, actors) in actor_links {
                for (entity_id, role) in actors {
                    self.store.link_event_actor(&event_id, &entity_id, &role)?;
                }
            }
            for (event_id, subjects) in subject_links {
                for entity_id in subjects {
                    self.store.link_event_subject(&event_id, &entity_id)?;
                }
            }
        }

        Ok(())
    }

    async fn process_graph_upsert(&mut self, job: EventJob) -> Result<(), WorkerError> {
        let materializer = GraphMaterializer::new(self.store);
        materializer.materialize_revision(&job.artifact_uid, &job.revision_id)?;
        Ok(())
    }
}

fn to_mention_input(artifact_uid: &str, revision_id: &str, mention: &memvault_extract::DraftEntityMention) -> MentionInput {
    MentionInput {
        artifact_uid: artifact_uid.to_string(),
        revision_id: revision_id.to_string(),
        surface_form: mention.surface_form.clone(),
        canonical_suggestion: mention.canonical_suggestion.clone(),
        entity_type: parse_entity_type(&mention.entity_type),
        role: mention.role.clone(),
        organization: mention.organization.clone(),
        email: mention.email.clone(),
        aliases: mention.aliases.clone(),
        start_char: mention.start_char,
        end_char: mention.end_char,
    }
}

fn parse_entity_type(raw: &str) -> EntityType {
    match raw {
        "person" => EntityType::Person,
        "org" => EntityType::Org,
        "project" => EntityType::Project,
        "object" => EntityType::Object,
        "place" => EntityType::Place,
        _ => EntityType::Other,
    }
}

/// `actors_json`/`subject_json` name entities by surface form:
/// `[{"surface_form": "...", "role": "..."}]` for actors, `["..."]` or
/// `[{"surface_form": "..."}]` for subjects. Anything that doesn't resolve
/// to an entity seen during this extraction run is silently dropped — it
/// means the LLM named an entity Phase A never extracted as a mention.
fn surface_forms_with_role<A: EntityAdjudicatorLlm>(
    value: &serde_json::Value,
    resolver: &EntityResolver<'_, A>,
) -> Vec<(String, String)> {
    let Some(items) = value.as_array() else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let surface_form = item.get("surface_form")?.as_str()?;
            let role = item.get("role").and_then(|v| v.as_str()).unwrap_or("actor");
            resolver.lookup(surface_form).map(|entity_id| (entity_id.to_string(), role.to_string()))
        })
        .collect()
}

fn surface_forms<A: EntityAdjudicatorLlm>(value: &serde_json::Value, resolver: &EntityResolver<'_, A>) -> Vec<String> {
    let Some(items) = value.as_array() else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let surface_form = item.as_str().or_else(|| item.get("surface_form")?.as_str())?;
            resolver.lookup(surface_form).map(|entity_id| entity_id.to_string())
        })
        .collect()
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memvault_core::errors::{EmbeddingError as CoreEmbeddingError, LlmError};
    use memvault_core::llm::{
        CanonicalEvent, ContextClues, ExtractedEntity, PromptAOutput, PromptBOutput, ResolutionDecision,
    };
    use memvault_core::traits::{HealthReport, HealthStatus};

    struct StubLlm;

    #[async_trait]
    impl EventExtractorLlm for StubLlm {
        async fn extract_chunk(&self, _chunk_text: &str) -> Result<PromptAOutput, LlmError> {
            Ok(PromptAOutput {
                entities: vec![ExtractedEntity {
                    surface_form: "Jane".to_string(),
                    canonical_suggestion: "Jane Doe".to_string(),
                    entity_type: "person".to_string(),
                    context_clues: ContextClues { role: None, org: None, email: None },
                    aliases: vec![],
                    confidence: 0.9,
                    start_char: 0,
                    end_char: 4,
                }],
                events: vec![],
            })
        }

        async fn canonicalize(&self, _phase_a_outputs: &[PromptAOutput]) -> Result<PromptBOutput, LlmError> {
            Ok(PromptBOutput {
                canonical_events: vec![CanonicalEvent {
                    category: "Commitment".to_string(),
                    event_time: None,
                    narrative: "Jane will send the report".to_string(),
                    subject: serde_json::json!([]),
                    actors: serde_json::json!([{"surface_form": "Jane", "role": "owner"}]),
                    confidence: 0.8,
                    evidence: vec![],
                }],
            })
        }
    }

    struct AlwaysDifferentLlm;

    #[async_trait]
    impl EntityAdjudicatorLlm for AlwaysDifferentLlm {
        async fn adjudicate(&self, _candidate: &str, _query: &str) -> Result<ResolutionDecision, LlmError> {
            Ok(ResolutionDecision::Different { reason: "distinct".to_string() })
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreEmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreEmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }

        async fn health_check(&self) -> HealthReport {
            HealthReport { status: HealthStatus::Healthy, latency_ms: 0 }
        }
    }

    fn seed_revision(store: &mut MemvaultStore) {
        use memvault_chunk::ChunkerConfig;
        use memvault_core::model::{ArtifactRevision, ArtifactType, PrivacyTags, Provenance};
        let content = "Jane will send the report by Friday.".to_string();
        let revision = ArtifactRevision {
            artifact_uid: "art_1".to_string(),
            revision_id: "rev_1".to_string(),
            artifact_id: "artifact-1".to_string(),
            artifact_type: ArtifactType::Chat,
            content: content.clone(),
            content_hash: memvault_core::hashing::sha256_hex(content.as_bytes()),
            token_count: 8,
            is_chunked: false,
            chunk_count: 1,
            privacy: PrivacyTags::default(),
            provenance: Provenance::default(),
            is_latest: true,
            created_at: chrono::Utc::now(),
        };
        store.upsert_artifact_revision(&revision).unwrap();
        let chunks = memvault_chunk::chunk(&content, "art_1", &ChunkerConfig::default())
            .into_iter()
            .map(|mut c| {
                c.artifact_uid = "art_1".to_string();
                c.revision_id = "rev_1".to_string();
                c
            })
            .collect::<Vec<_>>();
        store.replace_chunks("art_1", "rev_1", &chunks).unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
    }

    #[tokio::test]
    async fn extract_events_job_writes_event_and_links_actor() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        seed_revision(&mut store);

        let llm = StubLlm;
        let adjudicator = AlwaysDifferentLlm;
        let embedder = FixedEmbedder;
        let mut worker = Worker::new(&mut store, &llm, Some(&adjudicator), &embedder, WorkerConfig::new("worker-test"));

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.claimed_job_type, Some("extract_events"));
        assert!(report.job_succeeded);

        let events = store.list_events_for_revision("art_1", "rev_1").unwrap();
        assert_eq!(events.len(), 1);
        let actors = store.list_actors_for_event(&events[0].event_id).unwrap();
        assert_eq!(actors.len(), 1);
        assert_eq!(actors[0].role, "owner");
    }

    #[tokio::test]
    async fn graph_upsert_job_runs_after_extraction() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        seed_revision(&mut store);

        let llm = StubLlm;
        let adjudicator = AlwaysDifferentLlm;
        let embedder = FixedEmbedder;
        let mut worker = Worker::new(&mut store, &llm, Some(&adjudicator), &embedder, WorkerConfig::new("worker-test"));

        worker.run_once().await.unwrap();
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.claimed_job_type, Some("graph_upsert"));
        assert!(report.job_succeeded);
    }
}
