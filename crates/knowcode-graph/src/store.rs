use crate::error::{GraphError, Result};
use crate::types::{Attrs, Entity, EntityKind, Relationship, RelationshipKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

/// Version of the persisted knowledge document. Readers reject anything newer.
pub const KNOWLEDGE_SCHEMA_VERSION: u32 = 2;

/// Weight of the transitive-dependent count in the impact risk score.
pub const RISK_TRANSITIVE_WEIGHT: f64 = 0.18;
/// Weight of the file spread in the impact risk score.
pub const RISK_SPREAD_WEIGHT: f64 = 0.12;

#[derive(Debug, Clone)]
struct EdgeData {
    kind: RelationshipKind,
    attrs: Attrs,
}

/// Metadata about the scan that produced the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_at: Option<String>,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Direction for multi-hop call traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDirection {
    Callers,
    Callees,
}

/// One visited entity in a call trace, with its distance from the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHop {
    pub entity_id: String,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: usize,
    pub call_depth: usize,
}

/// Result of impact analysis for a single entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub entity_id: String,
    /// 1-hop callers and importers
    pub direct_dependents: Vec<String>,
    /// Everything reachable through reverse calls/imports within max_depth
    pub transitive_dependents: Vec<String>,
    pub affected_files: Vec<String>,
    /// 0.0 (isolated) .. 1.0 (core utility used everywhere)
    pub risk_score: f64,
}

#[derive(Serialize, Deserialize)]
struct PersistedKnowledge {
    schema_version: u32,
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    metadata: ScanMetadata,
}

/// In-memory semantic graph with id-keyed lookup and persistence.
///
/// Entities are petgraph nodes; resolved relationships are edges. Symbolic
/// relationships whose target never resolved are retained separately so
/// provenance survives a save/load round-trip.
#[derive(Default, Debug)]
pub struct KnowledgeStore {
    entities: HashMap<String, Entity>,
    graph: DiGraph<String, EdgeData>,
    node_index: HashMap<String, NodeIndex>,
    pending: Vec<Relationship>,
    metadata: ScanMetadata,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> &ScanMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ScanMetadata) {
        self.metadata = metadata;
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count() + self.pending.len()
    }

    /// Insert or replace an entity.
    pub fn insert_entity(&mut self, entity: Entity) {
        let id = entity.id.clone();
        if !self.node_index.contains_key(&id) {
            let idx = self.graph.add_node(id.clone());
            self.node_index.insert(id.clone(), idx);
        }
        self.entities.insert(id, entity);
    }

    /// Insert a relationship. Edges between known entities become graph
    /// edges; anything else is kept as a pending (unresolved) record.
    /// Duplicate (source, target, kind) edges collapse into one.
    pub fn insert_relationship(&mut self, rel: Relationship) {
        let (Some(&src), Some(&dst)) = (
            self.node_index.get(&rel.source_id),
            self.node_index.get(&rel.target_id),
        ) else {
            if !self.pending.contains(&rel) {
                self.pending.push(rel);
            }
            return;
        };

        let duplicate = self
            .graph
            .edges(src)
            .any(|e| e.target() == dst && e.weight().kind == rel.kind);
        if !duplicate {
            self.graph.add_edge(
                src,
                dst,
                EdgeData {
                    kind: rel.kind,
                    attrs: rel.attrs,
                },
            );
        }
    }

    /// Drop every entity located in `file_path`, together with all incident
    /// edges and pending records. Used by incremental re-indexing.
    pub fn remove_file(&mut self, file_path: &str) -> usize {
        let doomed: HashSet<String> = self
            .entities
            .values()
            .filter(|e| e.location.file_path == file_path)
            .map(|e| e.id.clone())
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        // Rebuild the graph from surviving records; node indices stay valid.
        let kept: Vec<Relationship> = self
            .relationships()
            .into_iter()
            .filter(|r| !doomed.contains(&r.source_id) && !doomed.contains(&r.target_id))
            .collect();

        for id in &doomed {
            self.entities.remove(id);
        }
        self.graph = DiGraph::new();
        self.node_index.clear();
        self.pending.clear();
        let ids: Vec<String> = self.entities.keys().cloned().collect();
        for id in ids {
            let idx = self.graph.add_node(id.clone());
            self.node_index.insert(id, idx);
        }
        for rel in kept {
            self.insert_relationship(rel);
        }

        doomed.len()
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn get_entities_by_kind(&self, kind: EntityKind) -> Vec<&Entity> {
        let mut found: Vec<&Entity> = self.entities.values().filter(|e| e.kind == kind).collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Case-insensitive substring search over name and qualified name.
    /// Ordering: exact name match, then name-prefix match, then shorter
    /// qualified name, then id.
    pub fn search(&self, pattern: &str) -> Vec<&Entity> {
        let needle = pattern.to_lowercase();
        let mut found: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| {
                e.name.to_lowercase().contains(&needle)
                    || e.qualified_name.to_lowercase().contains(&needle)
            })
            .collect();

        found.sort_by(|a, b| {
            let exact_a = a.name.eq_ignore_ascii_case(pattern);
            let exact_b = b.name.eq_ignore_ascii_case(pattern);
            let prefix_a = a.name.to_lowercase().starts_with(&needle);
            let prefix_b = b.name.to_lowercase().starts_with(&needle);
            exact_b
                .cmp(&exact_a)
                .then(prefix_b.cmp(&prefix_a))
                .then(a.qualified_name.len().cmp(&b.qualified_name.len()))
                .then(a.id.cmp(&b.id))
        });
        found
    }

    fn neighbors(
        &self,
        entity_id: &str,
        kinds: &[RelationshipKind],
        direction: Direction,
    ) -> Vec<&Entity> {
        let Some(&idx) = self.node_index.get(entity_id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for edge in self.graph.edges_directed(idx, direction) {
            if !kinds.contains(&edge.weight().kind) {
                continue;
            }
            let other = match direction {
                Direction::Outgoing => edge.target(),
                Direction::Incoming => edge.source(),
            };
            let Some(id) = self.graph.node_weight(other) else {
                continue;
            };
            if seen.insert(id.clone()) {
                if let Some(entity) = self.entities.get(id) {
                    found.push(entity);
                }
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn get_callers(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Calls], Direction::Incoming)
    }

    pub fn get_callees(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Calls], Direction::Outgoing)
    }

    pub fn get_children(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Contains], Direction::Outgoing)
    }

    pub fn get_parent(&self, entity_id: &str) -> Option<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Contains], Direction::Incoming)
            .into_iter()
            .next()
    }

    pub fn get_imports(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Imports], Direction::Outgoing)
    }

    pub fn get_inherits(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::Inherits], Direction::Outgoing)
    }

    /// Calls + imports, outgoing.
    pub fn get_dependencies(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(
            entity_id,
            &[RelationshipKind::Calls, RelationshipKind::Imports],
            Direction::Outgoing,
        )
    }

    /// Calls + imports, incoming.
    pub fn get_dependents(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(
            entity_id,
            &[RelationshipKind::Calls, RelationshipKind::Imports],
            Direction::Incoming,
        )
    }

    /// Commits that touched an entity, most useful for modules.
    pub fn get_recent_changes(&self, entity_id: &str) -> Vec<&Entity> {
        self.neighbors(entity_id, &[RelationshipKind::ChangedBy], Direction::Outgoing)
    }

    /// Breadth-first call-graph walk. Each visited entity is reported once
    /// with its distance from the origin; cycles are cut by a visited set.
    /// A missing origin yields an empty trace, not an error.
    pub fn trace_calls(
        &self,
        entity_id: &str,
        direction: TraceDirection,
        depth: usize,
        max_results: usize,
    ) -> Vec<TraceHop> {
        let mut hops = Vec::new();
        if self.node_index.get(entity_id).is_none() || depth == 0 || max_results == 0 {
            return hops;
        }

        let mut visited: HashSet<String> = HashSet::from([entity_id.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(entity_id.to_string(), 0)]);

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }
            let next = match direction {
                TraceDirection::Callers => self.get_callers(&current),
                TraceDirection::Callees => self.get_callees(&current),
            };
            for entity in next {
                if !visited.insert(entity.id.clone()) {
                    continue;
                }
                hops.push(TraceHop {
                    entity_id: entity.id.clone(),
                    name: entity.name.clone(),
                    qualified_name: entity.qualified_name.clone(),
                    file_path: entity.location.file_path.clone(),
                    line: entity.location.start_line,
                    call_depth: current_depth + 1,
                });
                if hops.len() >= max_results {
                    return hops;
                }
                queue.push_back((entity.id.clone(), current_depth + 1));
            }
        }
        hops
    }

    /// Estimate the blast radius of modifying an entity.
    ///
    /// risk = min(1, RISK_TRANSITIVE_WEIGHT * ln(1 + transitive)
    ///             + RISK_SPREAD_WEIGHT * affected_files)
    pub fn get_impact(&self, entity_id: &str, max_depth: usize) -> ImpactReport {
        let direct: Vec<String> = self
            .get_dependents(entity_id)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();

        let mut transitive: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([entity_id.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(entity_id.to_string(), 0)]);

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= max_depth {
                continue;
            }
            for dependent in self.get_dependents(&current) {
                if visited.insert(dependent.id.clone()) {
                    transitive.push(dependent.id.clone());
                    queue.push_back((dependent.id.clone(), current_depth + 1));
                }
            }
        }
        transitive.sort();

        let mut files: Vec<String> = transitive
            .iter()
            .filter_map(|id| self.entities.get(id))
            .map(|e| e.location.file_path.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        files.sort();

        let risk_score = (RISK_TRANSITIVE_WEIGHT * (1.0 + transitive.len() as f64).ln()
            + RISK_SPREAD_WEIGHT * files.len() as f64)
            .min(1.0);

        ImpactReport {
            entity_id: entity_id.to_string(),
            direct_dependents: direct,
            transitive_dependents: transitive,
            affected_files: files,
            risk_score,
        }
    }

    /// All relationships: resolved edges first, then pending records.
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut all: Vec<Relationship> = self
            .graph
            .edge_references()
            .filter_map(|e| {
                let source = self.graph.node_weight(e.source())?;
                let target = self.graph.node_weight(e.target())?;
                Some(Relationship {
                    source_id: source.clone(),
                    target_id: target.clone(),
                    kind: e.weight().kind,
                    attrs: e.weight().attrs.clone(),
                })
            })
            .collect();
        all.extend(self.pending.iter().cloned());
        all.sort_by(|a, b| {
            (&a.source_id, &a.target_id, a.kind.as_str())
                .cmp(&(&b.source_id, &b.target_id, b.kind.as_str()))
        });
        all
    }

    /// Persist as a single self-describing JSON document. The write is
    /// atomic: a temp file is renamed over the target.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let doc = PersistedKnowledge {
            schema_version: KNOWLEDGE_SCHEMA_VERSION,
            entities,
            relationships: self.relationships(),
            metadata: self.metadata.clone(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::info!(
            "Saved knowledge store: {} entities, {} relationships -> {}",
            doc.entities.len(),
            doc.relationships.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a previously saved document. Documents written by a newer
    /// schema are rejected with `SchemaMismatch`.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        let doc: PersistedKnowledge = serde_json::from_str(&data)?;
        if doc.schema_version > KNOWLEDGE_SCHEMA_VERSION {
            return Err(GraphError::SchemaMismatch {
                found: doc.schema_version,
                supported: KNOWLEDGE_SCHEMA_VERSION,
            });
        }

        let mut store = Self::new();
        for entity in doc.entities {
            store.insert_entity(entity);
        }
        for rel in doc.relationships {
            store.insert_relationship(rel);
        }
        store.metadata = doc.metadata;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Location;

    fn entity(kind: EntityKind, file: &str, qname: &str) -> Entity {
        let name = qname.rsplit('.').next().unwrap().to_string();
        Entity::new(kind, name, qname, Location::new(file, 1, 10))
    }

    fn sample_store() -> KnowledgeStore {
        let mut store = KnowledgeStore::new();
        store.insert_entity(entity(EntityKind::Module, "m.py", "m"));
        store.insert_entity(entity(EntityKind::Class, "m.py", "C"));
        store.insert_entity(entity(EntityKind::Method, "m.py", "C.f"));
        store.insert_entity(entity(EntityKind::Function, "m.py", "g"));
        store.insert_relationship(Relationship::new("m.py::m", "m.py::C", RelationshipKind::Contains));
        store.insert_relationship(Relationship::new("m.py::C", "m.py::C.f", RelationshipKind::Contains));
        store.insert_relationship(Relationship::new("m.py::m", "m.py::g", RelationshipKind::Contains));
        store.insert_relationship(Relationship::new("m.py::g", "m.py::C.f", RelationshipKind::Calls));
        store
    }

    #[test]
    fn test_get_entity_roundtrip() {
        let store = sample_store();
        let e = store.get_entity("m.py::C.f").unwrap();
        assert_eq!(e.kind, EntityKind::Method);
        assert!(store.get_entity("m.py::missing").is_none());

        let methods = store.get_entities_by_kind(EntityKind::Method);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, "m.py::C.f");
    }

    #[test]
    fn test_callers_and_callees() {
        let store = sample_store();
        let callers = store.get_callers("m.py::C.f");
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].id, "m.py::g");
        let callees = store.get_callees("m.py::g");
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].id, "m.py::C.f");
    }

    #[test]
    fn test_missing_id_yields_empty_not_error() {
        let store = sample_store();
        assert!(store.get_callers("nope").is_empty());
        assert!(store.trace_calls("nope", TraceDirection::Callers, 3, 10).is_empty());
        let impact = store.get_impact("nope", 3);
        assert!(impact.direct_dependents.is_empty());
        assert_eq!(impact.risk_score, 0.0);
    }

    #[test]
    fn test_trace_calls_depth_and_cycles() {
        let mut store = sample_store();
        // C.f calls g: now g -> C.f -> g is a cycle
        store.insert_relationship(Relationship::new(
            "m.py::C.f",
            "m.py::g",
            RelationshipKind::Calls,
        ));

        let hops = store.trace_calls("m.py::g", TraceDirection::Callees, 5, 50);
        // cycle cut by visited set: only C.f is reported
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].entity_id, "m.py::C.f");
        assert_eq!(hops[0].call_depth, 1);
    }

    #[test]
    fn test_trace_calls_respects_max_results() {
        let mut store = KnowledgeStore::new();
        store.insert_entity(entity(EntityKind::Function, "m.py", "hub"));
        for i in 0..20 {
            let qname = format!("f{i}");
            store.insert_entity(entity(EntityKind::Function, "m.py", &qname));
            store.insert_relationship(Relationship::new(
                "m.py::hub",
                format!("m.py::{qname}"),
                RelationshipKind::Calls,
            ));
        }
        let hops = store.trace_calls("m.py::hub", TraceDirection::Callees, 2, 5);
        assert_eq!(hops.len(), 5);
    }

    #[test]
    fn test_impact_isolated_method_scores_low() {
        let store = sample_store();
        let impact = store.get_impact("m.py::C.f", 3);
        assert_eq!(impact.direct_dependents, vec!["m.py::g".to_string()]);
        assert!(impact.risk_score >= 0.0 && impact.risk_score <= 0.2);
    }

    #[test]
    fn test_impact_core_utility_scores_high() {
        let mut store = KnowledgeStore::new();
        store.insert_entity(entity(EntityKind::Function, "util.py", "core"));
        for i in 0..30 {
            let file = format!("user{i}.py");
            store.insert_entity(entity(EntityKind::Function, &file, "caller"));
            store.insert_relationship(Relationship::new(
                format!("{file}::caller"),
                "util.py::core",
                RelationshipKind::Calls,
            ));
        }
        let impact = store.get_impact("util.py::core", 3);
        assert_eq!(impact.direct_dependents.len(), 30);
        assert!(impact.risk_score > 0.9);
    }

    #[test]
    fn test_search_ordering() {
        let mut store = KnowledgeStore::new();
        store.insert_entity(entity(EntityKind::Function, "a.py", "parse"));
        store.insert_entity(entity(EntityKind::Function, "b.py", "parse_config"));
        store.insert_entity(entity(EntityKind::Method, "c.py", "Config.reparse"));
        let found = store.search("parse");
        assert_eq!(found[0].qualified_name, "parse");
        assert_eq!(found[1].qualified_name, "parse_config");
    }

    #[test]
    fn test_unresolved_relationship_survives_persistence() {
        let mut store = sample_store();
        store.insert_relationship(
            Relationship::new("m.py::g", "ref::mystery", RelationshipKind::Calls)
                .with_attr("resolved", false),
        );
        let rels = store.relationships();
        assert!(rels.iter().any(|r| r.target_id == "ref::mystery"));
    }

    #[test]
    fn test_remove_file_drops_entities_and_edges() {
        let mut store = sample_store();
        store.insert_entity(entity(EntityKind::Function, "other.py", "h"));
        store.insert_relationship(Relationship::new(
            "other.py::h",
            "m.py::C.f",
            RelationshipKind::Calls,
        ));

        let removed = store.remove_file("other.py");
        assert_eq!(removed, 1);
        assert!(store.get_entity("other.py::h").is_none());
        assert!(store.get_callers("m.py::C.f").iter().all(|e| e.id != "other.py::h"));
        // remaining graph is intact
        assert_eq!(store.get_callers("m.py::C.f").len(), 1);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_and_schema_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");

        let store = sample_store();
        store.save(&path).await.unwrap();

        let loaded = KnowledgeStore::load(&path).await.unwrap();
        assert_eq!(loaded.entity_count(), store.entity_count());
        assert_eq!(loaded.relationships(), store.relationships());

        // identical content -> byte-identical document
        let first = tokio::fs::read(&path).await.unwrap();
        loaded.save(&path).await.unwrap();
        let second = tokio::fs::read(&path).await.unwrap();
        assert_eq!(first, second);

        // future schema version is rejected
        let mut doc: serde_json::Value =
            serde_json::from_slice(&first).unwrap();
        doc["schema_version"] = serde_json::json!(KNOWLEDGE_SCHEMA_VERSION + 1);
        tokio::fs::write(&path, serde_json::to_vec(&doc).unwrap())
            .await
            .unwrap();
        let err = KnowledgeStore::load(&path).await.unwrap_err();
        assert!(matches!(err, GraphError::SchemaMismatch { .. }));
    }
}
