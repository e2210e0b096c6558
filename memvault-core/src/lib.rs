pub mod config;
pub mod errors;
pub mod hashing;
pub mod ids;
pub mod llm;
pub mod model;
pub mod traits;

pub use config::MemvaultConfig;
pub use errors::{EmbeddingError, MemvaultError, ValidationError};
pub use hashing::{canonical_json, canonical_payload_hash, sha256_hex};
pub use ids::{artifact_uid_from_content, artifact_uid_from_source, chunk_id, revision_id};
