//! Deterministic ID schemes: artifact fingerprints, revision hashes, chunk IDs.
//!
//! All IDs here are pure functions of their inputs so that re-ingesting identical
//! content, or re-chunking identical text, reproduces identical IDs.

use crate::hashing::sha256_hex;

pub const ARTIFACT_PREFIX: &str = "art_";
pub const EVENT_PREFIX: &str = "evt_";

/// `art_` + first 8 hex chars of SHA-256(`source_system:source_id`).
pub fn artifact_uid_from_source(source_system: &str, source_id: &str) -> String {
    let digest = sha256_hex(format!("{source_system}:{source_id}").as_bytes());
    format!("{ARTIFACT_PREFIX}{}", &digest[..8])
}

/// `art_` + first 8 hex chars of SHA-256(content), used when no stable source
/// identity is supplied.
pub fn artifact_uid_from_content(content: &str) -> String {
    let digest = sha256_hex(content.as_bytes());
    format!("{ARTIFACT_PREFIX}{}", &digest[..8])
}

/// Full content hash, used both as the stored `content_hash` and as the
/// revision identity.
pub fn revision_id(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

/// `{artifact_id}::chunk::{index:03d}::{sha256(chunk_text)[:8]}`.
pub fn chunk_id(artifact_id: &str, index: usize, chunk_text: &str) -> String {
    let digest = sha256_hex(chunk_text.as_bytes());
    format!("{artifact_id}::chunk::{index:03}::{}", &digest[..8])
}

pub fn is_artifact_id(id: &str) -> bool {
    id.starts_with(ARTIFACT_PREFIX)
}

pub fn is_event_id(id: &str) -> bool {
    id.starts_with(EVENT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_uid_is_deterministic() {
        let a = artifact_uid_from_source("slack", "msg1");
        let b = artifact_uid_from_source("slack", "msg1");
        assert_eq!(a, b);
        assert!(a.starts_with(ARTIFACT_PREFIX));
        assert_eq!(a.len(), ARTIFACT_PREFIX.len() + 8);
    }

    #[test]
    fn artifact_uid_from_source_differs_per_source_id() {
        let a = artifact_uid_from_source("slack", "msg1");
        let b = artifact_uid_from_source("slack", "msg2");
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_id_is_stable_across_rechunking() {
        let first = chunk_id("art_deadbeef", 0, "hello world");
        let second = chunk_id("art_deadbeef", 0, "hello world");
        assert_eq!(first, second);
        assert!(first.starts_with("art_deadbeef::chunk::000::"));
    }

    #[test]
    fn chunk_id_index_is_zero_padded() {
        let id = chunk_id("art_deadbeef", 7, "text");
        assert!(id.contains("::chunk::007::"));
    }
}
