//! Projects the relational event/actor/subject rows for one revision into
//! the entity-relationship graph (`graph_node`/`graph_edge`). The graph is
//! a relational projection, not a native property-graph engine — upsert is
//! the only write path, and a revision's own nodes/edges are replaced
//! wholesale on every run rather than merged, so re-running extraction
//! never leaves stale edges behind.
//!
//! `POSSIBLY_SAME` edges are not written here: the entity resolver inserts
//! them directly at resolution time (they aren't tied to any one
//! revision's replace cycle and must survive across re-extractions).

use memvault_core::model::{
    revision_key, Entity, GraphEdge, GraphEdgeKind, GraphNode, GraphNodeKind,
};
use memvault_storage::{MemvaultStore, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("entity {0} referenced by event actor/subject row was not found")]
    DanglingEntity(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub events_processed: usize,
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
}

pub struct GraphMaterializer<'a> {
    store: &'a MemvaultStore,
}

impl<'a> GraphMaterializer<'a> {
    pub fn new(store: &'a MemvaultStore) -> Self {
        Self { store }
    }

    /// Rewrites the graph projection for `(artifact_uid, revision_id)`:
    /// drops this revision's prior Event nodes and ACTED_IN/ABOUT edges,
    /// then re-derives them from the current `semantic_event` rows.
    pub fn materialize_revision(
        &self,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<MaterializeReport, GraphError> {
        let key = revision_key(artifact_uid, revision_id);
        self.store.delete_graph_rows_for_revision(&key)?;

        let mut report = MaterializeReport::default();
        let events = self.store.list_events_for_revision(artifact_uid, revision_id)?;

        for event in &events {
            report.events_processed += 1;
            self.store.upsert_graph_node(&GraphNode {
                node_id: event.event_id.clone(),
                kind: GraphNodeKind::Event,
                properties: serde_json::json!({
                    "category": event.category,
                    "confidence": event.confidence,
                }),
                revision_key: Some(key.clone()),
            })?;
            report.nodes_upserted += 1;

            for actor in self.store.list_actors_for_event(&event.event_id)? {
                let entity = self.upsert_entity_node(&actor.entity_id)?;
                report.nodes_upserted += entity;
                self.store.upsert_graph_edge(&GraphEdge {
                    edge_id: edge_id(&actor.entity_id, &event.event_id, "acted_in"),
                    kind: GraphEdgeKind::ActedIn,
                    from_node_id: actor.entity_id.clone(),
                    to_node_id: event.event_id.clone(),
                    properties: serde_json::json!({ "role": actor.role }),
                    revision_key: Some(key.clone()),
                })?;
                report.edges_upserted += 1;
            }

            for subject in self.store.list_subjects_for_event(&event.event_id)? {
                let entity = self.upsert_entity_node(&subject.entity_id)?;
                report.nodes_upserted += entity;
                self.store.upsert_graph_edge(&GraphEdge {
                    edge_id: edge_id(&event.event_id, &subject.entity_id, "about"),
                    kind: GraphEdgeKind::About,
                    from_node_id: event.event_id.clone(),
                    to_node_id: subject.entity_id.clone(),
                    properties: serde_json::json!({}),
                    revision_key: Some(key.clone()),
                })?;
                report.edges_upserted += 1;
            }
        }

        Ok(report)
    }

    /// Projects an `Entity` row into a (revision-independent) graph node.
    /// Returns 1 if a write happened, 0 if the entity was missing — callers
    /// accumulate this into the upsert count rather than treating it as an
    /// error, since a dangling reference shouldn't abort the whole revision.
    fn upsert_entity_node(&self, entity_id: &str) -> Result<usize, GraphError> {
        let Some(entity) = self.store.get_entity(entity_id)? else {
            return Err(GraphError::DanglingEntity(entity_id.to_string()));
        };
        self.store.upsert_graph_node(&entity_to_node(&entity))?;
        Ok(1)
    }
}

fn entity_to_node(entity: &Entity) -> GraphNode {
    GraphNode {
        node_id: entity.entity_id.clone(),
        kind: GraphNodeKind::Entity,
        properties: serde_json::json!({
            "canonical_name": entity.canonical_name,
            "entity_type": entity.entity_type,
            "needs_review": entity.needs_review,
        }),
        revision_key: None,
    }
}

fn edge_id(from: &str, to: &str, label: &str) -> String {
    format!("edge_{label}_{from}_{to}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvault_core::model::{
        EntityType, EventActor, EventEvidence, EventSubject, SemanticEvent,
    };

    fn store_with_entity(store: &MemvaultStore, entity_id: &str) {
        store
            .insert_entity(&Entity {
                entity_id: entity_id.to_string(),
                entity_type: EntityType::Person,
                canonical_name: "Jane Doe".to_string(),
                normalized_name: "jane doe".to_string(),
                role: None,
                organization: None,
                email: None,
                context_embedding: None,
                first_seen_artifact_uid: "art_1".to_string(),
                first_seen_revision_id: "rev_1".to_string(),
                needs_review: false,
            })
            .unwrap();
    }

    fn insert_event(store: &mut MemvaultStore, event_id: &str, actor_entity: &str) {
        let event = SemanticEvent {
            event_id: event_id.to_string(),
            artifact_uid: "art_1".to_string(),
            revision_id: "rev_1".to_string(),
            category: "Commitment".to_string(),
            event_time: None,
            narrative: "Jane will ship the report".to_string(),
            subject_json: serde_json::json!({}),
            actors_json: serde_json::json!({}),
            confidence: 0.9,
            extraction_run_id: "run_1".to_string(),
        };
        store
            .replace_semantic_events("art_1", "rev_1", &[(event, Vec::<EventEvidence>::new())])
            .unwrap();
        store.link_event_actor(event_id, actor_entity, "owner").unwrap();
    }

    #[test]
    fn materializes_acted_in_edges_for_event_actors() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        store_with_entity(&store, "ent_1");
        insert_event(&mut store, "evt_1", "ent_1");

        let materializer = GraphMaterializer::new(&store);
        let report = materializer.materialize_revision("art_1", "rev_1").unwrap();

        assert_eq!(report.events_processed, 1);
        assert_eq!(report.edges_upserted, 1);

        let edges = store.one_hop_neighbors("evt_1", &[GraphEdgeKind::ActedIn], &[]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_node_id, "ent_1");
    }

    #[test]
    fn rerunning_materialize_drops_stale_edges() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        store_with_entity(&store, "ent_1");
        store_with_entity(&store, "ent_2");
        insert_event(&mut store, "evt_1", "ent_1");

        let materializer = GraphMaterializer::new(&store);
        materializer.materialize_revision("art_1", "rev_1").unwrap();

        // Re-extraction changes the event id and actor.
        insert_event(&mut store, "evt_2", "ent_2");
        let report = materializer.materialize_revision("art_1", "rev_1").unwrap();
        assert_eq!(report.events_processed, 1);

        let stale = store.one_hop_neighbors("evt_1", &[], &[]).unwrap();
        assert!(stale.is_empty());
        let fresh = store.one_hop_neighbors("evt_2", &[GraphEdgeKind::ActedIn], &[]).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].from_node_id, "ent_2");
    }

    #[test]
    fn event_subject_produces_about_edge() {
        let mut store = MemvaultStore::open_in_memory().unwrap();
        store_with_entity(&store, "ent_1");
        insert_event(&mut store, "evt_1", "ent_1");
        store.link_event_subject("evt_1", "ent_1").unwrap();

        let materializer = GraphMaterializer::new(&store);
        let report = materializer.materialize_revision("art_1", "rev_1").unwrap();
        assert_eq!(report.edges_upserted, 2);

        let about = store.one_hop_neighbors("evt_1", &[GraphEdgeKind::About], &[]).unwrap();
        assert_eq!(about.len(), 1);
        assert_eq!(about[0].to_node_id, "ent_1");
    }
}
