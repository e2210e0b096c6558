use chrono::{DateTime, Duration as ChronoDuration, Utc};
use memvault_core::model::{
    ArtifactRevision, ArtifactType, Chunk, ConversationTurn, Entity, EntityAlias, EntityMention, EntityType,
    EventActor, EventEvidence, EventJob, EventSubject, GraphEdge, GraphEdgeKind, GraphNode, GraphNodeKind,
    JobStatus, JobType, PrivacyTags, Provenance, SemanticEvent,
};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub const MEMVAULT_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

pub struct MemvaultStore {
    conn: Connection,
}

impl MemvaultStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > MEMVAULT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: MEMVAULT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_memvault_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn.execute("PRAGMA user_version = 1", [])?;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_conversation_turns.sql");
            self.conn.execute_batch(sql)?;
            self.conn.execute("PRAGMA user_version = 2", [])?;
        }

        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

fn artifact_type_to_str(kind: ArtifactType) -> &'static str {
    match kind {
        ArtifactType::Email => "email",
        ArtifactType::Doc => "doc",
        ArtifactType::Chat => "chat",
        ArtifactType::Transcript => "transcript",
        ArtifactType::Note => "note",
    }
}

fn artifact_type_from_str(raw: &str) -> Result<ArtifactType, StorageError> {
    match raw {
        "email" => Ok(ArtifactType::Email),
        "doc" => Ok(ArtifactType::Doc),
        "chat" => Ok(ArtifactType::Chat),
        "transcript" => Ok(ArtifactType::Transcript),
        "note" => Ok(ArtifactType::Note),
        other => Err(StorageError::Serialization(format!("unknown artifact_type {other}"))),
    }
}

fn job_type_to_str(kind: JobType) -> &'static str {
    match kind {
        JobType::ExtractEvents => "extract_events",
        JobType::GraphUpsert => "graph_upsert",
    }
}

fn job_type_from_str(raw: &str) -> Result<JobType, StorageError> {
    match raw {
        "extract_events" => Ok(JobType::ExtractEvents),
        "graph_upsert" => Ok(JobType::GraphUpsert),
        other => Err(StorageError::Serialization(format!("unknown job_type {other}"))),
    }
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PENDING",
        JobStatus::Processing => "PROCESSING",
        JobStatus::Done => "DONE",
        JobStatus::Failed => "FAILED",
    }
}

fn job_status_from_str(raw: &str) -> Result<JobStatus, StorageError> {
    match raw {
        "PENDING" => Ok(JobStatus::Pending),
        "PROCESSING" => Ok(JobStatus::Processing),
        "DONE" => Ok(JobStatus::Done),
        "FAILED" => Ok(JobStatus::Failed),
        other => Err(StorageError::Serialization(format!("unknown job status {other}"))),
    }
}

fn entity_type_to_str(kind: EntityType) -> &'static str {
    match kind {
        EntityType::Person => "person",
        EntityType::Org => "org",
        EntityType::Project => "project",
        EntityType::Object => "object",
        EntityType::Place => "place",
        EntityType::Other => "other",
    }
}

fn entity_type_from_str(raw: &str) -> Result<EntityType, StorageError> {
    match raw {
        "person" => Ok(EntityType::Person),
        "org" => Ok(EntityType::Org),
        "project" => Ok(EntityType::Project),
        "object" => Ok(EntityType::Object),
        "place" => Ok(EntityType::Place),
        "other" => Ok(EntityType::Other),
        other => Err(StorageError::Serialization(format!("unknown entity_type {other}"))),
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn embedding_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ---------------------------------------------------------------------------
// Artifact revisions
// ---------------------------------------------------------------------------

impl MemvaultStore {
    /// Inserts `revision` and demotes any prior latest revision of the same
    /// `artifact_uid`, atomically.
    pub fn upsert_artifact_revision(&mut self, revision: &ArtifactRevision) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        if revision.is_latest {
            tx.execute(
                "UPDATE artifact_revision SET is_latest = 0 WHERE artifact_uid = ?1 AND is_latest = 1",
                params![revision.artifact_uid],
            )?;
        }
        let participants_json = serde_json::to_string(&revision.provenance.participants)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        tx.execute(
            "INSERT INTO artifact_revision (
                artifact_uid, revision_id, artifact_id, artifact_type, content, content_hash,
                token_count, is_chunked, chunk_count, sensitivity, visibility_scope, retention_policy,
                source_system, title, author, participants_json, document_status, is_latest, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
             ON CONFLICT (artifact_uid, revision_id) DO NOTHING",
            params![
                revision.artifact_uid,
                revision.revision_id,
                revision.artifact_id,
                artifact_type_to_str(revision.artifact_type),
                revision.content,
                revision.content_hash,
                revision.token_count as i64,
                revision.is_chunked as i64,
                revision.chunk_count as i64,
                revision.privacy.sensitivity,
                revision.privacy.visibility_scope,
                revision.privacy.retention_policy,
                revision.provenance.source_system,
                revision.provenance.title,
                revision.provenance.author,
                participants_json,
                revision.provenance.document_status,
                revision.is_latest as i64,
                rfc3339(&revision.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_revision(
        &self,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Option<ArtifactRevision>, StorageError> {
        self.conn()
            .query_row(
                "SELECT artifact_uid, revision_id, artifact_id, artifact_type, content, content_hash,
                        token_count, is_chunked, chunk_count, sensitivity, visibility_scope, retention_policy,
                        source_system, title, author, participants_json, document_status, is_latest, created_at
                 FROM artifact_revision WHERE artifact_uid = ?1 AND revision_id = ?2",
                params![artifact_uid, revision_id],
                row_to_artifact_revision,
            )
            .optional()?
            .transpose()
    }

    pub fn get_latest_revision(&self, artifact_uid: &str) -> Result<Option<ArtifactRevision>, StorageError> {
        self.conn()
            .query_row(
                "SELECT artifact_uid, revision_id, artifact_id, artifact_type, content, content_hash,
                        token_count, is_chunked, chunk_count, sensitivity, visibility_scope, retention_policy,
                        source_system, title, author, participants_json, document_status, is_latest, created_at
                 FROM artifact_revision WHERE artifact_uid = ?1 AND is_latest = 1",
                params![artifact_uid],
                row_to_artifact_revision,
            )
            .optional()?
            .transpose()
    }

    /// Cascade-deletes a revision's chunks, events, evidence, actors,
    /// subjects and mentions. Entities and aliases are not touched — they
    /// are shared across revisions.
    pub fn delete_revision_derived_rows(
        &mut self,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM entity_mention WHERE artifact_uid = ?1 AND revision_id = ?2",
            params![artifact_uid, revision_id],
        )?;
        tx.execute(
            "DELETE FROM event_evidence WHERE event_id IN (
                SELECT event_id FROM semantic_event WHERE artifact_uid = ?1 AND revision_id = ?2
             )",
            params![artifact_uid, revision_id],
        )?;
        tx.execute(
            "DELETE FROM semantic_event WHERE artifact_uid = ?1 AND revision_id = ?2",
            params![artifact_uid, revision_id],
        )?;
        tx.execute(
            "DELETE FROM chunk WHERE artifact_uid = ?1 AND revision_id = ?2",
            params![artifact_uid, revision_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_artifact_revision(row: &rusqlite::Row) -> rusqlite::Result<Result<ArtifactRevision, StorageError>> {
    let participants_json: String = row.get(15)?;
    let created_at_raw: String = row.get(18)?;
    let artifact_type_raw: String = row.get(3)?;
    Ok((|| {
        Ok(ArtifactRevision {
            artifact_uid: row.get(0)?,
            revision_id: row.get(1)?,
            artifact_id: row.get(2)?,
            artifact_type: artifact_type_from_str(&artifact_type_raw)?,
            content: row.get(4)?,
            content_hash: row.get(5)?,
            token_count: row.get::<_, i64>(6)? as usize,
            is_chunked: row.get::<_, i64>(7)? != 0,
            chunk_count: row.get::<_, i64>(8)? as usize,
            privacy: PrivacyTags {
                sensitivity: row.get(9)?,
                visibility_scope: row.get(10)?,
                retention_policy: row.get(11)?,
            },
            provenance: Provenance {
                source_system: row.get(12)?,
                title: row.get(13)?,
                author: row.get(14)?,
                participants: serde_json::from_str(&participants_json)
                    .map_err(|err| StorageError::Serialization(err.to_string()))?,
                document_status: row.get(16)?,
            },
            is_latest: row.get::<_, i64>(17)? != 0,
            created_at: parse_rfc3339(&created_at_raw)?,
        })
    })())
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

impl MemvaultStore {
    pub fn replace_chunks(
        &mut self,
        artifact_uid: &str,
        revision_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM chunk WHERE artifact_uid = ?1 AND revision_id = ?2",
            params![artifact_uid, revision_id],
        )?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunk (chunk_id, artifact_uid, revision_id, idx, start_char, end_char, token_count, content_hash)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    chunk.chunk_id,
                    chunk.artifact_uid,
                    chunk.revision_id,
                    chunk.index as i64,
                    chunk.start_char as i64,
                    chunk.end_char as i64,
                    chunk.token_count as i64,
                    chunk.content_hash,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_chunks(&self, artifact_uid: &str, revision_id: &str) -> Result<Vec<Chunk>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT chunk_id, artifact_uid, revision_id, idx, start_char, end_char, token_count, content_hash
             FROM chunk WHERE artifact_uid = ?1 AND revision_id = ?2 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![artifact_uid, revision_id], |row| {
            Ok(Chunk {
                chunk_id: row.get(0)?,
                artifact_uid: row.get(1)?,
                revision_id: row.get(2)?,
                index: row.get::<_, i64>(3)? as usize,
                start_char: row.get::<_, i64>(4)? as usize,
                end_char: row.get::<_, i64>(5)? as usize,
                token_count: row.get::<_, i64>(6)? as usize,
                content_hash: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}

// ---------------------------------------------------------------------------
// Job queue. Claim functions always take job_type explicitly — a legacy
// type-agnostic claim would route graph_upsert jobs through the extraction
// path.
// ---------------------------------------------------------------------------

impl MemvaultStore {
    pub fn enqueue_job(
        &self,
        artifact_uid: &str,
        revision_id: &str,
        job_type: JobType,
        max_attempts: u32,
    ) -> Result<Option<String>, StorageError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = rfc3339(&Utc::now());
        let changed = self.conn().execute(
            "INSERT INTO event_job (job_id, artifact_uid, revision_id, job_type, status, attempts, max_attempts, next_run_at, created_at)
             VALUES (?1,?2,?3,?4,'PENDING',0,?5,?6,?6)
             ON CONFLICT (artifact_uid, revision_id, job_type) DO NOTHING",
            params![job_id, artifact_uid, revision_id, job_type_to_str(job_type), max_attempts as i64, now],
        )?;
        Ok(if changed == 1 { Some(job_id) } else { None })
    }

    /// Same as [`enqueue_job`](Self::enqueue_job) but runs against an
    /// already-open transaction, so callers can enqueue `graph_upsert` in
    /// the same transaction that wrote the extracted events.
    pub fn enqueue_job_tx(
        tx: &rusqlite::Transaction<'_>,
        artifact_uid: &str,
        revision_id: &str,
        job_type: JobType,
        max_attempts: u32,
    ) -> Result<Option<String>, StorageError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = rfc3339(&Utc::now());
        let changed = tx.execute(
            "INSERT INTO event_job (job_id, artifact_uid, revision_id, job_type, status, attempts, max_attempts, next_run_at, created_at)
             VALUES (?1,?2,?3,?4,'PENDING',0,?5,?6,?6)
             ON CONFLICT (artifact_uid, revision_id, job_type) DO NOTHING",
            params![job_id, artifact_uid, revision_id, job_type_to_str(job_type), max_attempts as i64, now],
        )?;
        Ok(if changed == 1 { Some(job_id) } else { None })
    }

    /// Claims one pending job of `job_type`, emulating `SELECT ... FOR
    /// UPDATE SKIP LOCKED LIMIT 1` with a single conditional UPDATE whose
    /// subquery picks the row and whose outer WHERE re-checks `status =
    /// 'PENDING'`. Run inside `BEGIN IMMEDIATE` so SQLite's writer lock
    /// serializes concurrent claimers; the row a second worker's subquery
    /// picked is gone by the time its UPDATE runs, so `changes() == 0`
    /// there and it simply finds no job.
    pub fn claim_job_by_type(
        &self,
        worker_id: &str,
        job_type: JobType,
    ) -> Result<Option<EventJob>, StorageError> {
        self.conn().execute_batch("BEGIN IMMEDIATE")?;

        let claim = (|| -> Result<Option<String>, StorageError> {
            let now = rfc3339(&Utc::now());
            let job_type_str = job_type_to_str(job_type);
            let job_id: Option<String> = self
                .conn()
                .query_row(
                    "SELECT job_id FROM event_job
                     WHERE status = 'PENDING' AND job_type = ?1 AND next_run_at <= ?2
                     ORDER BY created_at ASC LIMIT 1",
                    params![job_type_str, now],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(job_id) = job_id else { return Ok(None) };

            let changed = self.conn().execute(
                "UPDATE event_job SET status = 'PROCESSING', locked_at = ?1, locked_by = ?2, attempts = attempts + 1
                 WHERE job_id = ?3 AND status = 'PENDING'",
                params![now, worker_id, job_id],
            )?;
            Ok(if changed == 1 { Some(job_id) } else { None })
        })();

        let claim = match claim {
            Ok(value) => value,
            Err(err) => {
                self.conn().execute_batch("ROLLBACK")?;
                return Err(err);
            }
        };
        self.conn().execute_batch("COMMIT")?;

        let Some(job_id) = claim else { return Ok(None) };
        self.get_job(&job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<EventJob>, StorageError> {
        self.conn()
            .query_row(
                "SELECT job_id, artifact_uid, revision_id, job_type, status, attempts, max_attempts,
                        next_run_at, locked_at, locked_by, last_error, created_at
                 FROM event_job WHERE job_id = ?1",
                params![job_id],
                row_to_event_job,
            )
            .optional()?
            .transpose()
    }

    pub fn mark_done(&self, job_id: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "UPDATE event_job SET status = 'DONE', locked_at = NULL, locked_by = NULL, last_error = NULL
             WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    /// `retry = false` forces a terminal failure regardless of remaining
    /// attempts (used for non-retryable schema/parse errors).
    pub fn mark_failed(&self, job_id: &str, error_message: &str, retry: bool) -> Result<(), StorageError> {
        let job = self
            .get_job(job_id)?
            .ok_or_else(|| StorageError::NotFound(format!("job {job_id}")))?;

        if !retry || job.attempts >= job.max_attempts {
            self.conn().execute(
                "UPDATE event_job SET status = 'FAILED', locked_at = NULL, locked_by = NULL, last_error = ?1
                 WHERE job_id = ?2",
                params![error_message, job_id],
            )?;
            return Ok(());
        }

        let next_run_at = backoff_deadline(job.attempts);
        self.conn().execute(
            "UPDATE event_job SET status = 'PENDING', locked_at = NULL, locked_by = NULL, last_error = ?1, next_run_at = ?2
             WHERE job_id = ?3",
            params![error_message, rfc3339(&next_run_at), job_id],
        )?;
        Ok(())
    }

    /// Resets `PROCESSING` rows whose `locked_at` is older than
    /// `threshold_secs` back to `PENDING`, leaving `attempts` unchanged so a
    /// crashed worker's partial attempt still counts.
    pub fn reap_orphaned(&self, threshold_secs: i64) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(threshold_secs);
        let affected = self.conn().execute(
            "UPDATE event_job SET status = 'PENDING', locked_at = NULL, locked_by = NULL
             WHERE status = 'PROCESSING' AND locked_at <= ?1",
            params![rfc3339(&cutoff)],
        )?;
        Ok(affected)
    }
}

/// `base(1s) * 2^(attempts-1)` with up to 250ms of jitter, capped at 30s.
fn backoff_deadline(attempts: u32) -> DateTime<Utc> {
    let base_ms: u64 = 1_000;
    let capped_exponent = attempts.saturating_sub(1).min(20);
    let backoff_ms = base_ms.saturating_mul(1u64 << capped_exponent).min(30_000);
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..=250);
    Utc::now() + ChronoDuration::milliseconds((backoff_ms + jitter_ms) as i64)
}

fn row_to_event_job(row: &rusqlite::Row) -> rusqlite::Result<Result<EventJob, StorageError>> {
    let job_type_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let next_run_at_raw: String = row.get(7)?;
    let locked_at_raw: Option<String> = row.get(8)?;
    let created_at_raw: String = row.get(11)?;
    Ok((|| {
        Ok(EventJob {
            job_id: row.get(0)?,
            artifact_uid: row.get(1)?,
            revision_id: row.get(2)?,
            job_type: job_type_from_str(&job_type_raw)?,
            status: job_status_from_str(&status_raw)?,
            attempts: row.get::<_, i64>(5)? as u32,
            max_attempts: row.get::<_, i64>(6)? as u32,
            next_run_at: parse_rfc3339(&next_run_at_raw)?,
            locked_at: locked_at_raw.map(|raw| parse_rfc3339(&raw)).transpose()?,
            locked_by: row.get(9)?,
            last_error: row.get(10)?,
            created_at: parse_rfc3339(&created_at_raw)?,
        })
    })())
}

// ---------------------------------------------------------------------------
// Semantic events: atomic replace-on-extraction-success.
// ---------------------------------------------------------------------------

impl MemvaultStore {
    /// Deletes the prior event set for `(artifact_uid, revision_id)` and
    /// inserts `events`/`evidence` in the same transaction, then enqueues a
    /// `graph_upsert` job for the same revision so materialization is
    /// guaranteed even if the worker process dies right after.
    pub fn replace_semantic_events(
        &mut self,
        artifact_uid: &str,
        revision_id: &str,
        events: &[(SemanticEvent, Vec<EventEvidence>)],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM event_evidence WHERE event_id IN (
                SELECT event_id FROM semantic_event WHERE artifact_uid = ?1 AND revision_id = ?2
             )",
            params![artifact_uid, revision_id],
        )?;
        tx.execute(
            "DELETE FROM semantic_event WHERE artifact_uid = ?1 AND revision_id = ?2",
            params![artifact_uid, revision_id],
        )?;

        for (event, evidence) in events {
            tx.execute(
                "INSERT INTO semantic_event (event_id, artifact_uid, revision_id, category, event_time,
                    narrative, subject_json, actors_json, confidence, extraction_run_id)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    event.event_id,
                    event.artifact_uid,
                    event.revision_id,
                    event.category,
                    event.event_time.map(|ts| rfc3339(&ts)),
                    event.narrative,
                    serde_json::to_string(&event.subject_json).map_err(|e| StorageError::Serialization(e.to_string()))?,
                    serde_json::to_string(&event.actors_json).map_err(|e| StorageError::Serialization(e.to_string()))?,
                    event.confidence,
                    event.extraction_run_id,
                ],
            )?;
            for span in evidence {
                tx.execute(
                    "INSERT INTO event_evidence (evidence_id, event_id, artifact_uid, revision_id, chunk_id, start_char, end_char, quote)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    params![
                        span.evidence_id,
                        span.event_id,
                        span.artifact_uid,
                        span.revision_id,
                        span.chunk_id,
                        span.start_char as i64,
                        span.end_char as i64,
                        span.quote,
                    ],
                )?;
            }
        }

        Self::enqueue_job_tx(&tx, artifact_uid, revision_id, JobType::GraphUpsert, 5)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_events_for_revision(
        &self,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<SemanticEvent>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT event_id, artifact_uid, revision_id, category, event_time, narrative, subject_json,
                    actors_json, confidence, extraction_run_id
             FROM semantic_event WHERE artifact_uid = ?1 AND revision_id = ?2",
        )?;
        let rows = stmt.query_map(params![artifact_uid, revision_id], row_to_semantic_event)?;
        rows.collect::<Result<Vec<_>, _>>()?.into_iter().collect()
    }

    pub fn get_event(&self, event_id: &str) -> Result<Option<SemanticEvent>, StorageError> {
        self.conn()
            .query_row(
                "SELECT event_id, artifact_uid, revision_id, category, event_time, narrative, subject_json,
                        actors_json, confidence, extraction_run_id
                 FROM semantic_event WHERE event_id = ?1",
                params![event_id],
                row_to_semantic_event,
            )
            .optional()?
            .transpose()
    }

    pub fn list_events_by_category(
        &self,
        artifact_uids: &[String],
        categories: &[String],
        limit: usize,
    ) -> Result<Vec<SemanticEvent>, StorageError> {
        if artifact_uids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders_a = artifact_uids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = artifact_uids.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

        let sql = if categories.is_empty() {
            format!(
                "SELECT event_id, artifact_uid, revision_id, category, event_time, narrative, subject_json,
                        actors_json, confidence, extraction_run_id
                 FROM semantic_event WHERE artifact_uid IN ({placeholders_a}) LIMIT {limit}"
            )
        } else {
            let placeholders_c = categories.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            params_vec.extend(categories.iter().map(|v| v as &dyn rusqlite::ToSql));
            format!(
                "SELECT event_id, artifact_uid, revision_id, category, event_time, narrative, subject_json,
                        actors_json, confidence, extraction_run_id
                 FROM semantic_event WHERE artifact_uid IN ({placeholders_a}) AND category IN ({placeholders_c}) LIMIT {limit}"
            )
        };

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_vec.as_slice(), row_to_semantic_event)?;
        rows.collect::<Result<Vec<_>, _>>()?.into_iter().collect()
    }
}

fn row_to_semantic_event(row: &rusqlite::Row) -> rusqlite::Result<Result<SemanticEvent, StorageError>> {
    let event_time_raw: Option<String> = row.get(4)?;
    let subject_raw: String = row.get(6)?;
    let actors_raw: String = row.get(7)?;
    Ok((|| {
        Ok(SemanticEvent {
            event_id: row.get(0)?,
            artifact_uid: row.get(1)?,
            revision_id: row.get(2)?,
            category: row.get(3)?,
            event_time: event_time_raw.map(|raw| parse_rfc3339(&raw)).transpose()?,
            narrative: row.get(5)?,
            subject_json: serde_json::from_str(&subject_raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
            actors_json: serde_json::from_str(&actors_raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
            confidence: row.get(8)?,
            extraction_run_id: row.get(9)?,
        })
    })())
}

// ---------------------------------------------------------------------------
// Entities, aliases, mentions.
// ---------------------------------------------------------------------------

impl MemvaultStore {
    pub fn insert_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO entity (entity_id, entity_type, canonical_name, normalized_name, role, organization,
                email, context_embedding, first_seen_artifact_uid, first_seen_revision_id, needs_review)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                entity.entity_id,
                entity_type_to_str(entity.entity_type),
                entity.canonical_name,
                entity.normalized_name,
                entity.role,
                entity.organization,
                entity.email,
                entity.context_embedding.as_deref().map(embedding_to_blob),
                entity.first_seen_artifact_uid,
                entity.first_seen_revision_id,
                entity.needs_review as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_entity_by_normalized_name(
        &self,
        entity_type: EntityType,
        normalized_name: &str,
    ) -> Result<Option<Entity>, StorageError> {
        self.conn()
            .query_row(
                "SELECT entity_id, entity_type, canonical_name, normalized_name, role, organization, email,
                        context_embedding, first_seen_artifact_uid, first_seen_revision_id, needs_review
                 FROM entity WHERE entity_type = ?1 AND normalized_name = ?2",
                params![entity_type_to_str(entity_type), normalized_name],
                row_to_entity,
            )
            .optional()?
            .transpose()
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, StorageError> {
        self.conn()
            .query_row(
                "SELECT entity_id, entity_type, canonical_name, normalized_name, role, organization, email,
                        context_embedding, first_seen_artifact_uid, first_seen_revision_id, needs_review
                 FROM entity WHERE entity_id = ?1",
                params![entity_id],
                row_to_entity,
            )
            .optional()?
            .transpose()
    }

    /// Candidates of `entity_type` with their stored embedding distance to
    /// `query_embedding`, closest first, truncated to `max_candidates`.
    /// SQLite has no vector index, so the scan and distance computation
    /// happen in Rust; fine at the scale this store targets.
    pub fn find_entity_candidates(
        &self,
        entity_type: EntityType,
        query_embedding: &[f32],
        max_distance: f64,
        max_candidates: usize,
    ) -> Result<Vec<(Entity, f64)>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT entity_id, entity_type, canonical_name, normalized_name, role, organization, email,
                    context_embedding, first_seen_artifact_uid, first_seen_revision_id, needs_review
             FROM entity WHERE entity_type = ?1 AND context_embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![entity_type_to_str(entity_type)], row_to_entity)?;

        let mut scored = Vec::new();
        for row in rows {
            let entity = row??;
            if let Some(embedding) = &entity.context_embedding {
                let distance = cosine_distance(query_embedding, embedding);
                if distance < max_distance {
                    scored.push((entity, distance));
                }
            }
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_candidates);
        Ok(scored)
    }

    pub fn add_alias(&self, entity_id: &str, alias: &str, normalized_alias: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO entity_alias (entity_id, alias, normalized_alias) VALUES (?1,?2,?3)
             ON CONFLICT (entity_id, normalized_alias) DO NOTHING",
            params![entity_id, alias, normalized_alias],
        )?;
        Ok(())
    }

    pub fn list_aliases(&self, entity_id: &str) -> Result<Vec<EntityAlias>, StorageError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT entity_id, alias, normalized_alias FROM entity_alias WHERE entity_id = ?1")?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(EntityAlias {
                entity_id: row.get(0)?,
                alias: row.get(1)?,
                normalized_alias: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    pub fn insert_mention(&self, mention: &EntityMention) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO entity_mention (mention_id, entity_id, artifact_uid, revision_id, surface_form, start_char, end_char)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                mention.mention_id,
                mention.entity_id,
                mention.artifact_uid,
                mention.revision_id,
                mention.surface_form,
                mention.start_char as i64,
                mention.end_char as i64,
            ],
        )?;
        Ok(())
    }

    pub fn set_needs_review(&self, entity_id: &str, needs_review: bool) -> Result<(), StorageError> {
        self.conn().execute(
            "UPDATE entity SET needs_review = ?1 WHERE entity_id = ?2",
            params![needs_review as i64, entity_id],
        )?;
        Ok(())
    }

    pub fn link_event_actor(&self, event_id: &str, entity_id: &str, role: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO event_actor (event_id, entity_id, role) VALUES (?1,?2,?3)
             ON CONFLICT (event_id, entity_id) DO UPDATE SET role = excluded.role",
            params![event_id, entity_id, role],
        )?;
        Ok(())
    }

    pub fn link_event_subject(&self, event_id: &str, entity_id: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO event_subject (event_id, entity_id) VALUES (?1,?2) ON CONFLICT DO NOTHING",
            params![event_id, entity_id],
        )?;
        Ok(())
    }

    pub fn list_actors_for_event(&self, event_id: &str) -> Result<Vec<EventActor>, StorageError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT event_id, entity_id, role FROM event_actor WHERE event_id = ?1")?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok(EventActor {
                event_id: row.get(0)?,
                entity_id: row.get(1)?,
                role: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    pub fn list_subjects_for_event(&self, event_id: &str) -> Result<Vec<EventSubject>, StorageError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT event_id, entity_id FROM event_subject WHERE event_id = ?1")?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok(EventSubject {
                event_id: row.get(0)?,
                entity_id: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Result<Entity, StorageError>> {
    let entity_type_raw: String = row.get(1)?;
    let embedding_blob: Option<Vec<u8>> = row.get(7)?;
    Ok((|| {
        Ok(Entity {
            entity_id: row.get(0)?,
            entity_type: entity_type_from_str(&entity_type_raw)?,
            canonical_name: row.get(2)?,
            normalized_name: row.get(3)?,
            role: row.get(4)?,
            organization: row.get(5)?,
            email: row.get(6)?,
            context_embedding: embedding_blob.map(|blob| embedding_from_blob(&blob)),
            first_seen_artifact_uid: row.get(8)?,
            first_seen_revision_id: row.get(9)?,
            needs_review: row.get::<_, i64>(10)? != 0,
        })
    })())
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a.sqrt() * norm_b.sqrt()))
}

// ---------------------------------------------------------------------------
// Graph: relational projection (graph_node / graph_edge). §9/ADR-004.
// ---------------------------------------------------------------------------

impl MemvaultStore {
    pub fn upsert_graph_node(&self, node: &GraphNode) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO graph_node (node_id, kind, properties, revision_key) VALUES (?1,?2,?3,?4)
             ON CONFLICT (node_id) DO UPDATE SET properties = excluded.properties, revision_key = excluded.revision_key",
            params![
                node.node_id,
                graph_node_kind_to_str(node.kind),
                serde_json::to_string(&node.properties).map_err(|e| StorageError::Serialization(e.to_string()))?,
                node.revision_key,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_graph_edge(&self, edge: &GraphEdge) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO graph_edge (edge_id, kind, from_node_id, to_node_id, properties, revision_key) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT (edge_id) DO UPDATE SET properties = excluded.properties, revision_key = excluded.revision_key",
            params![
                edge.edge_id,
                graph_edge_kind_to_str(edge.kind),
                edge.from_node_id,
                edge.to_node_id,
                serde_json::to_string(&edge.properties).map_err(|e| StorageError::Serialization(e.to_string()))?,
                edge.revision_key,
            ],
        )?;
        Ok(())
    }

    /// Deletes all `Event` nodes and `ACTED_IN`/`ABOUT` edges tagged with
    /// this revision key. Entity nodes and `POSSIBLY_SAME` edges are never
    /// revision-scoped and survive. Edges are deleted first since node
    /// deletion would cascade them anyway, but an edge's own revision_key
    /// can outlive its endpoint nodes in odd reorderings — deleting both
    /// explicitly keeps the replace idempotent either way.
    pub fn delete_graph_rows_for_revision(&self, revision_key: &str) -> Result<(), StorageError> {
        self.conn().execute("DELETE FROM graph_edge WHERE revision_key = ?1", params![revision_key])?;
        self.conn().execute("DELETE FROM graph_node WHERE revision_key = ?1", params![revision_key])?;
        Ok(())
    }

    /// One-hop neighbors of `node_id`, optionally filtered to a set of edge
    /// kinds and excluding a set of neighbor node ids (used to keep graph
    /// seeds out of their own expansion).
    pub fn one_hop_neighbors(
        &self,
        node_id: &str,
        kinds: &[GraphEdgeKind],
        exclude_node_ids: &[String],
    ) -> Result<Vec<GraphEdge>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT edge_id, kind, from_node_id, to_node_id, properties, revision_key
             FROM graph_edge WHERE from_node_id = ?1 OR to_node_id = ?1",
        )?;
        let rows = stmt.query_map(params![node_id], row_to_graph_edge)?;
        let mut edges = Vec::new();
        for row in rows {
            let edge = row??;
            if !kinds.is_empty() && !kinds.contains(&edge.kind) {
                continue;
            }
            let neighbor = if edge.from_node_id == node_id { &edge.to_node_id } else { &edge.from_node_id };
            if exclude_node_ids.iter().any(|excluded| excluded == neighbor) {
                continue;
            }
            edges.push(edge);
        }
        Ok(edges)
    }
}

fn graph_node_kind_to_str(kind: GraphNodeKind) -> &'static str {
    match kind {
        GraphNodeKind::Entity => "Entity",
        GraphNodeKind::Event => "Event",
    }
}

fn graph_edge_kind_to_str(kind: GraphEdgeKind) -> &'static str {
    match kind {
        GraphEdgeKind::ActedIn => "ACTED_IN",
        GraphEdgeKind::About => "ABOUT",
        GraphEdgeKind::PossiblySame => "POSSIBLY_SAME",
    }
}

fn graph_edge_kind_from_str(raw: &str) -> Result<GraphEdgeKind, StorageError> {
    match raw {
        "ACTED_IN" => Ok(GraphEdgeKind::ActedIn),
        "ABOUT" => Ok(GraphEdgeKind::About),
        "POSSIBLY_SAME" => Ok(GraphEdgeKind::PossiblySame),
        other => Err(StorageError::Serialization(format!("unknown edge kind {other}"))),
    }
}

fn row_to_graph_edge(row: &rusqlite::Row) -> rusqlite::Result<Result<GraphEdge, StorageError>> {
    let kind_raw: String = row.get(1)?;
    let properties_raw: String = row.get(4)?;
    let revision_key: Option<String> = row.get(5)?;
    Ok((|| {
        Ok(GraphEdge {
            edge_id: row.get(0)?,
            kind: graph_edge_kind_from_str(&kind_raw)?,
            from_node_id: row.get(2)?,
            to_node_id: row.get(3)?,
            properties: serde_json::from_str(&properties_raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
            revision_key,
        })
    })())
}

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

impl MemvaultStore {
    /// Records that `(conversation_id, turn_index)` was written as the given
    /// artifact revision. Called by the Ingester when `context="conversation"`.
    pub fn record_conversation_turn(&self, turn: &ConversationTurn) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO conversation_turn (conversation_id, turn_index, artifact_uid, revision_id, role, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT (conversation_id, turn_index) DO UPDATE SET
                artifact_uid = excluded.artifact_uid,
                revision_id = excluded.revision_id,
                role = excluded.role,
                created_at = excluded.created_at",
            params![
                turn.conversation_id,
                turn.turn_index,
                turn.artifact_uid,
                turn.revision_id,
                turn.role,
                rfc3339(&turn.created_at),
            ],
        )?;
        Ok(())
    }

    /// Ordered turn history for `recall`'s conversation-history mode: no
    /// embedding call, a direct relational read.
    pub fn list_conversation_turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, turn_index, artifact_uid, revision_id, role, created_at
             FROM conversation_turn WHERE conversation_id = ?1 ORDER BY turn_index ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_conversation_turn)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }
}

fn row_to_conversation_turn(row: &rusqlite::Row) -> rusqlite::Result<Result<ConversationTurn, StorageError>> {
    let created_at_raw: String = row.get(5)?;
    Ok((|| {
        Ok(ConversationTurn {
            conversation_id: row.get(0)?,
            turn_index: row.get(1)?,
            artifact_uid: row.get(2)?,
            revision_id: row.get(3)?,
            role: row.get(4)?,
            created_at: parse_rfc3339(&created_at_raw)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvault_core::model::JobType;

    fn sample_revision(artifact_uid: &str, content_hash: &str) -> ArtifactRevision {
        ArtifactRevision {
            artifact_uid: artifact_uid.to_string(),
            revision_id: content_hash.to_string(),
            artifact_id: format!("{artifact_uid}-id"),
            artifact_type: ArtifactType::Note,
            content: "hello world".to_string(),
            content_hash: content_hash.to_string(),
            token_count: 2,
            is_chunked: false,
            chunk_count: 0,
            privacy: PrivacyTags::default(),
            provenance: Provenance {
                source_system: "test".to_string(),
                ..Default::default()
            },
            is_latest: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn migrate_sets_schema_version() {
        let store = MemvaultStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), MEMVAULT_SCHEMA_VERSION);
    }

    #[test]
    fn upsert_artifact_revision_demotes_prior_latest() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        let first = sample_revision("art_aaaa0000", "hash-1");
        store.upsert_artifact_revision(&first).unwrap();

        let mut second = sample_revision("art_aaaa0000", "hash-2");
        second.content = "updated".to_string();
        store.upsert_artifact_revision(&second).unwrap();

        let latest = store.get_latest_revision("art_aaaa0000").unwrap().unwrap();
        assert_eq!(latest.revision_id, "hash-2");

        let stale = store.get_revision("art_aaaa0000", "hash-1").unwrap().unwrap();
        assert!(!stale.is_latest);
    }

    #[test]
    fn claim_job_by_type_only_returns_matching_type() {
        let store = MemvaultStore::open_in_memory().unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::GraphUpsert, 5).unwrap();

        let claimed = store.claim_job_by_type("worker-a", JobType::GraphUpsert).unwrap().unwrap();
        assert_eq!(claimed.job_type, JobType::GraphUpsert);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
    }

    #[test]
    fn enqueue_job_is_idempotent_under_unique_constraint() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let first = store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
        let second = store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn mark_failed_terminal_after_max_attempts() {
        let store = MemvaultStore::open_in_memory().unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 1).unwrap();
        let job = store.claim_job_by_type("worker-a", JobType::ExtractEvents).unwrap().unwrap();
        store.mark_failed(&job.job_id, "boom", true).unwrap();

        let reloaded = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
    }

    #[test]
    fn mark_failed_retries_under_max_attempts() {
        let store = MemvaultStore::open_in_memory().unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
        let job = store.claim_job_by_type("worker-a", JobType::ExtractEvents).unwrap().unwrap();
        store.mark_failed(&job.job_id, "transient", true).unwrap();

        let reloaded = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert!(reloaded.next_run_at > Utc::now());
    }

    #[test]
    fn reap_orphaned_resets_stale_processing_jobs() {
        let store = MemvaultStore::open_in_memory().unwrap();
        store.enqueue_job("art_1", "rev_1", JobType::ExtractEvents, 5).unwrap();
        let job = store.claim_job_by_type("worker-a", JobType::ExtractEvents).unwrap().unwrap();
        store.conn().execute(
            "UPDATE event_job SET locked_at = ?1 WHERE job_id = ?2",
            params![rfc3339(&(Utc::now() - ChronoDuration::seconds(3600))), job.job_id],
        ).unwrap();

        let reaped = store.reap_orphaned(300).unwrap();
        assert_eq!(reaped, 1);
        let reloaded = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
    }

    #[test]
    fn cosine_distance_identical_vectors_is_zero() {
        let a = vec![1.0_f32, 0.0, 0.0];
        assert!(cosine_distance(&a, &a) < 1e-6);
    }

    #[test]
    fn conversation_turns_round_trip_in_order() {
        let store = MemvaultStore::open_in_memory().unwrap();
        store
            .record_conversation_turn(&ConversationTurn {
                conversation_id: "conv-1".to_string(),
                turn_index: 1,
                artifact_uid: "art_bbbb0001".to_string(),
                revision_id: "hash-1".to_string(),
                role: Some("user".to_string()),
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .record_conversation_turn(&ConversationTurn {
                conversation_id: "conv-1".to_string(),
                turn_index: 0,
                artifact_uid: "art_bbbb0000".to_string(),
                revision_id: "hash-0".to_string(),
                role: Some("assistant".to_string()),
                created_at: Utc::now(),
            })
            .unwrap();

        let turns = store.list_conversation_turns("conv-1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_index, 0);
        assert_eq!(turns[1].turn_index, 1);
    }

    #[test]
    fn recording_same_turn_twice_overwrites() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let mut turn = ConversationTurn {
            conversation_id: "conv-2".to_string(),
            turn_index: 0,
            artifact_uid: "art_cccc0000".to_string(),
            revision_id: "hash-a".to_string(),
            role: Some("user".to_string()),
            created_at: Utc::now(),
        };
        store.record_conversation_turn(&turn).unwrap();
        turn.revision_id = "hash-b".to_string();
        store.record_conversation_turn(&turn).unwrap();

        let turns = store.list_conversation_turns("conv-2").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].revision_id, "hash-b");
    }
}
