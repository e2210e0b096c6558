//! Capability traits at the seams where a concrete external dependency would
//! otherwise sit: the embedding provider, and the two LLM call sites used by
//! the extractor and the entity resolver. Concrete clients are out of scope;
//! these traits are what `memvault-embed`, `memvault-extract`, and
//! `memvault-resolve` are built against.

use async_trait::async_trait;

use crate::errors::{EmbeddingError, LlmError};
use crate::llm::{PromptAOutput, PromptBOutput, ResolutionDecision};

/// A health-probe result, returned by [`Embedder::health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
}

/// The stable contract consumed by `memvault-chunk`/`memvault-extract`/
/// `memvault-resolve`: fixed output dimension, internal batching, and
/// retry/backoff already applied.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn health_check(&self) -> HealthReport;
}

/// The raw, unretried network call an `Embedder` wraps. A concrete
/// implementation (HTTP client, local model) lives outside this workspace.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn max_batch_size(&self) -> usize;
}

/// Phase A/B of the event extractor: one call per chunk, one canonicalization
/// call per revision.
#[async_trait]
pub trait EventExtractorLlm: Send + Sync {
    async fn extract_chunk(&self, chunk_text: &str) -> Result<PromptAOutput, LlmError>;

    async fn canonicalize(&self, phase_a_outputs: &[PromptAOutput]) -> Result<PromptBOutput, LlmError>;
}

/// The entity-adjudication call made once per candidate during resolution.
#[async_trait]
pub trait EntityAdjudicatorLlm: Send + Sync {
    async fn adjudicate(
        &self,
        candidate_context: &str,
        query_context: &str,
    ) -> Result<ResolutionDecision, LlmError>;
}

/// A vector held in the `content` or `chunks` collection of the vector
/// index, with metadata carried alongside for filtered k-NN search.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A k-NN hit: the stored record's id, its cosine distance from the query,
/// and its rank within the collection (0-based).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct VectorQueryFilter {
    pub context: Option<String>,
    pub source: Option<String>,
    pub sensitivity: Option<String>,
    pub min_importance: Option<f64>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

/// The `content`/`chunks` vector store. A concrete embedded or hosted
/// implementation is out of scope; `memvault-ingest` and `memvault-retrieve`
/// are built against this trait.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<(), EmbeddingError>;

    async fn delete_by_artifact(&self, collection: &str, artifact_uid: &str) -> Result<(), EmbeddingError>;

    async fn knn(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: &VectorQueryFilter,
    ) -> Result<Vec<VectorHit>, EmbeddingError>;
}
