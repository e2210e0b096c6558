use thiserror::Error;

/// Top-level error type returned across crate boundaries by orchestration entry
/// points (`remember`, `recall`, worker job handlers).
#[derive(Debug, Error)]
pub enum MemvaultError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("hashing error: {0}")]
    Hashing(#[from] crate::hashing::HashingError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Input rejected before any storage or network work was attempted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("empty content")]
    EmptyContent,

    #[error("content exceeds maximum size of {max} bytes (got {actual})")]
    ContentTooLarge { max: usize, actual: usize },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown source system: {0}")]
    UnknownSourceSystem(String),

    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Errors surfaced by an `Embedder` implementation, classified so callers can
/// decide whether a retry is worthwhile.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding provider rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("embedding provider returned dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider rejected input: {0}")]
    Rejected(String),

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

impl EmbeddingError {
    /// Whether a caller should back off and retry, as opposed to failing the
    /// job terminally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Timeout(_) | EmbeddingError::RateLimited { .. } | EmbeddingError::Unavailable(_)
        )
    }
}

/// Errors surfaced by an LLM-backed extraction or adjudication call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm call timed out after {0}ms")]
    Timeout(u64),

    #[error("llm provider rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("llm returned output that failed schema validation: {0}")]
    SchemaViolation(String),

    #[error("llm returned malformed json: {0}")]
    MalformedJson(String),

    #[error("llm provider unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::RateLimited { .. } | LlmError::Unavailable(_)
        )
    }
}

/// Errors from the relational store. Kept separate from `rusqlite::Error` so
/// that callers outside `memvault-storage` never need that dependency.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("backend error: {0}")]
    Backend(String),
}
