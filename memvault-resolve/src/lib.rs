//! Entity resolution: maps each raw mention surfaced by the extractor onto
//! a canonical [`Entity`] row, creating one when no existing entity matches
//! closely enough. Invoked inline with extraction so the whole
//! extract-resolve-write sequence commits as one unit.

use std::collections::HashMap;

use memvault_core::errors::{EmbeddingError, LlmError};
use memvault_core::llm::ResolutionDecision;
use memvault_core::model::{Entity, EntityMention, EntityType};
use memvault_core::model::normalize_name;
use memvault_core::traits::{Embedder, EntityAdjudicatorLlm};
use memvault_storage::{MemvaultStore, StorageError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub similarity_threshold: f64,
    pub max_candidates: usize,
    /// Used only when the adjudication LLM is unavailable: a stricter
    /// cutoff so embedding-only matching doesn't silently merge distinct
    /// entities.
    pub fallback_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_candidates: 5,
            fallback_threshold: 0.95,
        }
    }
}

/// A raw mention surfaced by the extractor, not yet tied to a canonical
/// entity.
#[derive(Debug, Clone)]
pub struct MentionInput {
    pub artifact_uid: String,
    pub revision_id: String,
    pub surface_form: String,
    pub canonical_suggestion: String,
    pub entity_type: EntityType,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub aliases: Vec<String>,
    pub start_char: usize,
    pub end_char: usize,
}

pub struct ResolvedMention {
    pub entity_id: String,
    pub needs_review: bool,
}

enum Adjudication {
    Matched { entity_id: String, needs_review: bool },
    Uncertain { candidate_entity_id: String, reason: String },
    NoMatch,
}

pub struct EntityResolver<'a, L: EntityAdjudicatorLlm> {
    config: ResolverConfig,
    store: &'a MemvaultStore,
    embedder: &'a dyn Embedder,
    adjudicator: Option<&'a L>,
    /// `surface_form -> entity_id`, including canonical forms and aliases,
    /// so repeated mentions of the same surface form within one call
    /// resolve consistently without repeated candidate search.
    seen: HashMap<String, String>,
}

impl<'a, L: EntityAdjudicatorLlm> EntityResolver<'a, L> {
    pub fn new(
        config: ResolverConfig,
        store: &'a MemvaultStore,
        embedder: &'a dyn Embedder,
        adjudicator: Option<&'a L>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            adjudicator,
            seen: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, mention: &MentionInput) -> Result<ResolvedMention, ResolveError> {
        let normalized = normalize_name(&mention.canonical_suggestion);

        if let Some(entity_id) = self.seen.get(&normalized) {
            let entity_id = entity_id.clone();
            self.insert_mention(&entity_id, mention)?;
            self.seen.insert(normalize_name(&mention.surface_form), entity_id.clone());
            return Ok(ResolvedMention { entity_id, needs_review: false });
        }

        // Exact-match shortcut: same normalized name and type, no LLM call.
        if let Some(existing) = self.store.get_entity_by_normalized_name(mention.entity_type, &normalized)? {
            self.remember_aliases(&existing, mention, &normalized)?;
            self.insert_mention(&existing.entity_id, mention)?;
            self.seen.insert(normalized, existing.entity_id.clone());
            self.seen.insert(normalize_name(&mention.surface_form), existing.entity_id.clone());
            return Ok(ResolvedMention { entity_id: existing.entity_id, needs_review: existing.needs_review });
        }

        let context_text = format!(
            "{}, {}, {}, {}",
            mention.canonical_suggestion,
            entity_type_label(mention.entity_type),
            mention.role.as_deref().unwrap_or(""),
            mention.organization.as_deref().unwrap_or(""),
        );
        let query_embedding = self.embedder.embed(&context_text).await?;

        let candidates = self.store.find_entity_candidates(
            mention.entity_type,
            &query_embedding,
            1.0 - self.config.similarity_threshold,
            self.config.max_candidates,
        )?;

        let outcome = match self.adjudicator {
            Some(adjudicator) => {
                self.adjudicate_candidates(adjudicator, &candidates, &context_text).await?
            }
            None => match self.fallback_embedding_only(&candidates) {
                Some((entity_id, needs_review)) => Adjudication::Matched { entity_id, needs_review },
                None => Adjudication::NoMatch,
            },
        };

        let (entity_id, needs_review) = match outcome {
            Adjudication::Matched { entity_id, needs_review } => {
                self.link_alias(&entity_id, &mention.surface_form)?;
                (entity_id, needs_review)
            }
            Adjudication::Uncertain { candidate_entity_id, reason } => {
                let entity = self.create_entity(mention, &query_embedding, true)?;
                let candidate = candidates.iter().find(|(c, _)| c.entity_id == candidate_entity_id).map(|(c, _)| c);
                self.link_possibly_same(&entity.entity_id, &candidate_entity_id, candidate, &reason)?;
                (entity.entity_id, true)
            }
            Adjudication::NoMatch => {
                let entity = self.create_entity(mention, &query_embedding, false)?;
                (entity.entity_id, false)
            }
        };

        self.insert_mention(&entity_id, mention)?;
        self.seen.insert(normalized, entity_id.clone());
        self.seen.insert(normalize_name(&mention.surface_form), entity_id.clone());
        Ok(ResolvedMention { entity_id, needs_review })
    }

    /// Looks up the entity a surface form resolved to earlier in this call,
    /// by canonical suggestion or by raw surface form. Used by the worker to
    /// link a canonical event's `actors`/`subject` references (which name
    /// entities by surface form) to `entity_id`s after resolution.
    pub fn lookup(&self, surface_form: &str) -> Option<&str> {
        self.seen.get(&normalize_name(surface_form)).map(String::as_str)
    }

    async fn adjudicate_candidates(
        &self,
        adjudicator: &L,
        candidates: &[(Entity, f64)],
        query_context: &str,
    ) -> Result<Adjudication, ResolveError> {
        for (candidate, _distance) in candidates {
            let candidate_context = format!(
                "{}, {}, {}, {}",
                candidate.canonical_name,
                entity_type_label(candidate.entity_type),
                candidate.role.as_deref().unwrap_or(""),
                candidate.organization.as_deref().unwrap_or(""),
            );
            let decision = match adjudicator.adjudicate(&candidate_context, query_context).await {
                Ok(decision) => decision,
                Err(_llm_unavailable) => {
                    return Ok(match self.fallback_embedding_only(candidates) {
                        Some((entity_id, needs_review)) => Adjudication::Matched { entity_id, needs_review },
                        None => Adjudication::NoMatch,
                    });
                }
            };
            match decision {
                ResolutionDecision::Same { .. } => {
                    return Ok(Adjudication::Matched {
                        entity_id: candidate.entity_id.clone(),
                        needs_review: candidate.needs_review,
                    });
                }
                ResolutionDecision::Different { .. } => continue,
                ResolutionDecision::Uncertain { reason } => {
                    return Ok(Adjudication::Uncertain {
                        candidate_entity_id: candidate.entity_id.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(Adjudication::NoMatch)
    }

    /// Conservative fallback when the adjudication LLM is unavailable:
    /// accept only candidates within `fallback_threshold`, otherwise defer
    /// to creating a new entity flagged for review rather than guessing.
    fn fallback_embedding_only(&self, candidates: &[(Entity, f64)]) -> Option<(String, bool)> {
        candidates
            .iter()
            .find(|(_, distance)| *distance < 1.0 - self.config.fallback_threshold)
            .map(|(entity, _)| (entity.entity_id.clone(), true))
    }

    fn create_entity(&self, mention: &MentionInput, embedding: &[f32], needs_review: bool) -> Result<Entity, ResolveError> {
        let entity = Entity {
            entity_id: format!("ent_{}", Uuid::new_v4().simple()),
            entity_type: mention.entity_type,
            canonical_name: mention.canonical_suggestion.clone(),
            normalized_name: normalize_name(&mention.canonical_suggestion),
            role: mention.role.clone(),
            organization: mention.organization.clone(),
            email: mention.email.clone(),
            context_embedding: Some(embedding.to_vec()),
            first_seen_artifact_uid: mention.artifact_uid.clone(),
            first_seen_revision_id: mention.revision_id.clone(),
            needs_review,
        };
        self.store.insert_entity(&entity)?;
        self.link_alias(&entity.entity_id, &mention.surface_form)?;
        for alias in &mention.aliases {
            self.link_alias(&entity.entity_id, alias)?;
        }
        Ok(entity)
    }

    /// Records a `POSSIBLY_SAME` edge between a newly created entity and
    /// the candidate the adjudicator was uncertain about. Both ends need a
    /// `graph_node` row before the edge insert — the candidate may not have
    /// one yet, since `extract_events` runs before `graph_upsert` ever
    /// materializes it as a participant.
    fn link_possibly_same(
        &self,
        new_entity_id: &str,
        candidate_entity_id: &str,
        candidate: Option<&Entity>,
        reason: &str,
    ) -> Result<(), ResolveError> {
        self.store.upsert_graph_node(&memvault_core::model::GraphNode {
            node_id: new_entity_id.to_string(),
            kind: memvault_core::model::GraphNodeKind::Entity,
            properties: serde_json::json!({ "needs_review": true }),
            revision_key: None,
        })?;
        let candidate_properties = match candidate {
            Some(entity) => serde_json::json!({
                "canonical_name": entity.canonical_name,
                "entity_type": entity.entity_type,
                "needs_review": entity.needs_review,
            }),
            None => serde_json::json!({}),
        };
        self.store.upsert_graph_node(&memvault_core::model::GraphNode {
            node_id: candidate_entity_id.to_string(),
            kind: memvault_core::model::GraphNodeKind::Entity,
            properties: candidate_properties,
            revision_key: None,
        })?;
        self.store.upsert_graph_edge(&memvault_core::model::GraphEdge {
            edge_id: format!("edge_{}", Uuid::new_v4().simple()),
            kind: memvault_core::model::GraphEdgeKind::PossiblySame,
            from_node_id: new_entity_id.to_string(),
            to_node_id: candidate_entity_id.to_string(),
            properties: serde_json::json!({ "reason": reason }),
            revision_key: None,
        })?;
        Ok(())
    }

    fn link_alias(&self, entity_id: &str, alias: &str) -> Result<(), ResolveError> {
        let normalized = normalize_name(alias);
        self.store.add_alias(entity_id, alias, &normalized)?;
        Ok(())
    }

    fn remember_aliases(&self, existing: &Entity, mention: &MentionInput, _normalized: &str) -> Result<(), ResolveError> {
        if mention.surface_form != existing.canonical_name {
            self.link_alias(&existing.entity_id, &mention.surface_form)?;
        }
        Ok(())
    }

    fn insert_mention(&self, entity_id: &str, mention: &MentionInput) -> Result<(), ResolveError> {
        let row = EntityMention {
            mention_id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            artifact_uid: mention.artifact_uid.clone(),
            revision_id: mention.revision_id.clone(),
            surface_form: mention.surface_form.clone(),
            start_char: mention.start_char,
            end_char: mention.end_char,
        };
        self.store.insert_mention(&row)?;
        Ok(())
    }
}

fn entity_type_label(kind: EntityType) -> &'static str {
    match kind {
        EntityType::Person => "person",
        EntityType::Org => "org",
        EntityType::Project => "project",
        EntityType::Object => "object",
        EntityType::Place => "place",
        EntityType::Other => "other",
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memvault_core::traits::{Embedder, HealthReport, HealthStatus};

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }

        async fn health_check(&self) -> HealthReport {
            HealthReport { status: HealthStatus::Healthy, latency_ms: 0 }
        }
    }

    struct AlwaysDifferentLlm;

    #[async_trait]
    impl EntityAdjudicatorLlm for AlwaysDifferentLlm {
        async fn adjudicate(&self, _candidate: &str, _query: &str) -> Result<ResolutionDecision, LlmError> {
            Ok(ResolutionDecision::Different { reason: "distinct person".to_string() })
        }
    }

    struct AlwaysUncertainLlm;

    #[async_trait]
    impl EntityAdjudicatorLlm for AlwaysUncertainLlm {
        async fn adjudicate(&self, _candidate: &str, _query: &str) -> Result<ResolutionDecision, LlmError> {
            Ok(ResolutionDecision::Uncertain { reason: "could be the same person".to_string() })
        }
    }

    fn sample_mention(surface: &str) -> MentionInput {
        MentionInput {
            artifact_uid: "art_1".to_string(),
            revision_id: "rev_1".to_string(),
            surface_form: surface.to_string(),
            canonical_suggestion: surface.to_string(),
            entity_type: EntityType::Person,
            role: None,
            organization: None,
            email: None,
            aliases: vec![],
            start_char: 0,
            end_char: surface.len(),
        }
    }

    #[tokio::test]
    async fn new_mention_creates_entity_when_no_candidates() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let llm = AlwaysDifferentLlm;
        let mut resolver = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&llm));

        let resolved = resolver.resolve(&sample_mention("Jane Doe")).await.unwrap();
        assert!(!resolved.needs_review);
        let entity = store.get_entity(&resolved.entity_id).unwrap().unwrap();
        assert_eq!(entity.canonical_name, "Jane Doe");
    }

    #[tokio::test]
    async fn repeated_surface_form_in_same_call_reuses_entity() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let llm = AlwaysDifferentLlm;
        let mut resolver = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&llm));

        let first = resolver.resolve(&sample_mention("Jane Doe")).await.unwrap();
        let second = resolver.resolve(&sample_mention("Jane Doe")).await.unwrap();
        assert_eq!(first.entity_id, second.entity_id);
    }

    #[tokio::test]
    async fn exact_normalized_name_match_skips_llm() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let llm = AlwaysDifferentLlm;

        {
            let mut resolver = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&llm));
            resolver.resolve(&sample_mention("Jane Doe")).await.unwrap();
        }
        let mut second_call = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&llm));
        let resolved = second_call.resolve(&sample_mention("jane   doe")).await.unwrap();
        let entity = store.get_entity(&resolved.entity_id).unwrap().unwrap();
        assert_eq!(entity.canonical_name, "Jane Doe");
    }

    #[tokio::test]
    async fn uncertain_adjudication_links_possibly_same_without_fk_violation() {
        let store = MemvaultStore::open_in_memory().unwrap();
        let embedder = FixedEmbedder;
        let different = AlwaysDifferentLlm;
        let uncertain = AlwaysUncertainLlm;

        let first = {
            let mut resolver = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&different));
            resolver.resolve(&sample_mention("Jane Doe")).await.unwrap()
        };

        let second = {
            let mut resolver = EntityResolver::new(ResolverConfig::default(), &store, &embedder, Some(&uncertain));
            resolver.resolve(&sample_mention("J. Doe")).await.unwrap()
        };

        assert!(second.needs_review);
        assert_ne!(first.entity_id, second.entity_id);
        assert!(store.get_entity(&first.entity_id).unwrap().is_some());
        assert!(store.get_entity(&second.entity_id).unwrap().is_some());
    }
}
