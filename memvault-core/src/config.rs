//! Environment-variable configuration, in the teacher's ad hoc `std::env::var`
//! style rather than a layered config crate.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn env_string(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key,
            value,
            reason: "could not parse".to_string(),
        }),
    }
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

/// Runtime configuration for every crate in the workspace, assembled once at
/// process start via [`MemvaultConfig::from_env`].
#[derive(Debug, Clone)]
pub struct MemvaultConfig {
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub embedding_timeout_ms: u64,

    pub chunk_threshold_tokens: usize,
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,

    pub entity_similarity_threshold: f64,
    pub entity_max_candidates: usize,
    pub entity_dedup_model: Option<String>,

    pub retrieval_max_distance: f64,

    pub graph_enabled: bool,
    pub graph_query_timeout_ms: u64,
    pub graph_budget_default: usize,
    pub graph_budget_max: usize,
    pub graph_seed_limit_default: usize,

    pub poll_interval_ms: u64,
    pub event_max_attempts: u32,
    pub worker_id: String,

    pub short_turn_token_threshold: usize,
    pub category_normalization_mode: String,
}

impl MemvaultConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            embedding_model: env_string("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dims: env_parsed("EMBEDDING_DIMS", 1536)?,
            embedding_timeout_ms: env_parsed("EMBEDDING_TIMEOUT_MS", 10_000)?,

            chunk_threshold_tokens: env_parsed("CHUNK_THRESHOLD", 1200)?,
            chunk_target_tokens: env_parsed("CHUNK_TARGET", 900)?,
            chunk_overlap_tokens: env_parsed("CHUNK_OVERLAP", 100)?,

            entity_similarity_threshold: env_parsed("ENTITY_SIMILARITY_THRESHOLD", 0.85)?,
            entity_max_candidates: env_parsed("ENTITY_MAX_CANDIDATES", 5)?,
            entity_dedup_model: env_opt_string("ENTITY_DEDUP_MODEL"),

            retrieval_max_distance: env_parsed("RETRIEVAL_MAX_DISTANCE", 0.35)?,

            graph_enabled: env_bool("GRAPH_ENABLED", true)?,
            graph_query_timeout_ms: env_parsed("GRAPH_QUERY_TIMEOUT_MS", 500)?,
            graph_budget_default: env_parsed("GRAPH_BUDGET_DEFAULT", 10)?,
            graph_budget_max: env_parsed("GRAPH_BUDGET_MAX", 50)?,
            graph_seed_limit_default: env_parsed("GRAPH_SEED_LIMIT_DEFAULT", 1)?,

            poll_interval_ms: env_parsed("POLL_INTERVAL_MS", 1000)?,
            event_max_attempts: env_parsed("EVENT_MAX_ATTEMPTS", 5)?,
            worker_id: env_opt_string("WORKER_ID").unwrap_or_else(default_worker_id),

            short_turn_token_threshold: env_parsed("SHORT_TURN_TOKEN_THRESHOLD", 100)?,
            category_normalization_mode: env_string("CATEGORY_NORMALIZATION_MODE", "normalize"),
        })
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn graph_query_timeout(&self) -> Duration {
        Duration::from_millis(self.graph_query_timeout_ms)
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        env::remove_var("CHUNK_THRESHOLD");
        let config = MemvaultConfig::from_env().unwrap();
        assert_eq!(config.chunk_threshold_tokens, 1200);
        assert!(config.graph_enabled);
    }

    #[test]
    fn invalid_numeric_value_is_rejected() {
        env::set_var("EVENT_MAX_ATTEMPTS", "not-a-number");
        let result = MemvaultConfig::from_env();
        env::remove_var("EVENT_MAX_ATTEMPTS");
        assert!(result.is_err());
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        env::set_var("GRAPH_ENABLED", "no");
        let config = MemvaultConfig::from_env().unwrap();
        env::remove_var("GRAPH_ENABLED");
        assert!(!config.graph_enabled);
    }
}
