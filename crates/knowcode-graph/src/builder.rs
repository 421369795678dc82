use crate::store::{KnowledgeStore, ScanMetadata};
use crate::types::{
    AttrValue, Entity, EntityKind, ParseOutcome, Relationship, RelationshipKind, SYMBOLIC_PREFIX,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Accumulates per-file parse outputs and resolves symbolic references into
/// a concrete [`KnowledgeStore`].
///
/// Frontends emit relationships whose targets are `ref::Name` placeholders;
/// resolution happens here once every file has been merged, because a call
/// target may live in a file parsed later.
#[derive(Default)]
pub struct GraphBuilder {
    entities: BTreeMap<String, Entity>,
    relationships: Vec<Relationship>,
    errors: Vec<String>,
    file_count: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Merge one file's parse output into the pending graph.
    pub fn merge(&mut self, outcome: ParseOutcome) {
        self.file_count += 1;
        for entity in outcome.entities {
            self.entities.insert(entity.id.clone(), entity);
        }
        self.relationships.extend(outcome.relationships);
        self.errors.extend(
            outcome
                .errors
                .into_iter()
                .map(|e| format!("{}: {e}", outcome.file_path)),
        );
    }

    /// Merge an auxiliary pass (temporal, coverage) that already uses
    /// concrete entity ids.
    pub fn merge_pass(&mut self, outcome: ParseOutcome) {
        for entity in outcome.entities {
            self.entities.insert(entity.id.clone(), entity);
        }
        self.relationships.extend(outcome.relationships);
        self.errors.extend(outcome.errors);
    }

    /// Resolve references, verify structural invariants, and build the store.
    pub fn build(mut self, scanned_at: Option<String>) -> KnowledgeStore {
        let resolver = Resolver::new(&self.entities, &self.relationships);
        let resolved: Vec<Relationship> = self
            .relationships
            .iter()
            .map(|rel| resolver.resolve(rel))
            .collect();
        self.relationships = resolved;
        self.enforce_contains_forest();

        let mut store = KnowledgeStore::new();
        for entity in self.entities.into_values() {
            store.insert_entity(entity);
        }
        for rel in self.relationships {
            store.insert_relationship(rel);
        }
        store.set_metadata(ScanMetadata {
            scanned_at,
            file_count: self.file_count,
            errors: self.errors,
        });
        log::info!(
            "Graph built: {} entities, {} relationships, {} errors",
            store.entity_count(),
            store.relationship_count(),
            store.metadata().errors.len()
        );
        store
    }

    /// `contains` must form a forest: one parent per child, no cycles.
    /// Violating edges are dropped and recorded as errors.
    fn enforce_contains_forest(&mut self) {
        let mut parent_of: HashMap<String, String> = HashMap::new();
        let mut kept = Vec::with_capacity(self.relationships.len());

        for rel in self.relationships.drain(..) {
            if rel.kind != RelationshipKind::Contains {
                kept.push(rel);
                continue;
            }
            if let Some(existing) = parent_of.get(&rel.target_id) {
                if existing != &rel.source_id {
                    self.errors.push(format!(
                        "containment conflict: {} already contained by {existing}, dropping edge from {}",
                        rel.target_id, rel.source_id
                    ));
                }
                continue;
            }
            // Reject edges that would close a containment cycle.
            let mut cursor = rel.source_id.clone();
            let mut cyclic = false;
            while let Some(parent) = parent_of.get(&cursor) {
                if parent == &rel.target_id {
                    cyclic = true;
                    break;
                }
                cursor = parent.clone();
            }
            if cyclic {
                self.errors.push(format!(
                    "containment cycle between {} and {}, dropping edge",
                    rel.source_id, rel.target_id
                ));
                continue;
            }
            parent_of.insert(rel.target_id.clone(), rel.source_id.clone());
            kept.push(rel);
        }
        self.relationships = kept;
    }

}

/// Read-only view used during reference resolution.
struct Resolver<'a> {
    entities: &'a BTreeMap<String, Entity>,
    /// name -> candidate entity ids (covers short name and qualified name)
    by_name: HashMap<&'a str, Vec<&'a str>>,
    /// module file -> module entity ids it imports (resolved eagerly)
    module_imports: HashMap<String, HashSet<String>>,
}

impl<'a> Resolver<'a> {
    fn new(entities: &'a BTreeMap<String, Entity>, relationships: &[Relationship]) -> Self {
        let mut by_name: HashMap<&str, Vec<&str>> = HashMap::new();
        for entity in entities.values() {
            by_name.entry(&entity.name).or_default().push(&entity.id);
            if entity.qualified_name != entity.name {
                by_name
                    .entry(&entity.qualified_name)
                    .or_default()
                    .push(&entity.id);
            }
        }

        let mut resolver = Self {
            entities,
            by_name,
            module_imports: HashMap::new(),
        };

        // Pre-resolve import edges so the call scope chain can consult them.
        let mut module_imports: HashMap<String, HashSet<String>> = HashMap::new();
        for rel in relationships {
            if rel.kind != RelationshipKind::Imports || !rel.is_symbolic() {
                continue;
            }
            let Some(source) = entities.get(&rel.source_id) else {
                continue;
            };
            let name = &rel.target_id[SYMBOLIC_PREFIX.len()..];
            if let Some(target) = resolver.find_module(name) {
                module_imports
                    .entry(source.location.file_path.clone())
                    .or_default()
                    .insert(target.to_string());
            }
        }
        resolver.module_imports = module_imports;
        resolver
    }

    fn resolve(&self, rel: &Relationship) -> Relationship {
        if !rel.is_symbolic() {
            return rel.clone();
        }
        let name = &rel.target_id[SYMBOLIC_PREFIX.len()..];
        match rel.kind {
            RelationshipKind::Imports => self.resolve_named(rel, name, EntityKind::Module),
            RelationshipKind::Inherits => self.resolve_named(rel, name, EntityKind::Class),
            RelationshipKind::Calls => self.resolve_call(rel, name),
            _ => rel.clone(),
        }
    }

    /// Imports and inherits: best match against entities of one kind.
    fn resolve_named(&self, rel: &Relationship, name: &str, kind: EntityKind) -> Relationship {
        let target = match kind {
            EntityKind::Module => self.find_module(name),
            _ => self.find_by_kind(name, kind),
        };
        match target {
            Some(id) => Relationship {
                source_id: rel.source_id.clone(),
                target_id: id.to_string(),
                kind: rel.kind,
                attrs: rel.attrs.clone(),
            },
            None => {
                let mut unresolved = rel.clone();
                unresolved
                    .attrs
                    .insert("resolved".into(), AttrValue::Bool(false));
                unresolved
            }
        }
    }

    fn find_module(&self, name: &str) -> Option<&str> {
        let last = name.rsplit('.').next().unwrap_or(name);
        let mut candidates: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::Module)
            .filter(|e| {
                e.qualified_name == name
                    || e.name == last
                    || e.qualified_name.ends_with(&format!(".{last}"))
            })
            .collect();
        candidates.sort_by(|a, b| {
            let exact_a = a.qualified_name == name;
            let exact_b = b.qualified_name == name;
            exact_b.cmp(&exact_a).then(a.id.cmp(&b.id))
        });
        candidates.first().map(|e| e.id.as_str())
    }

    fn find_by_kind(&self, name: &str, kind: EntityKind) -> Option<&str> {
        let mut candidates = self.candidates(name);
        candidates.retain(|id| {
            self.entities
                .get(*id)
                .map(|e| e.kind == kind)
                .unwrap_or(false)
        });
        candidates.sort();
        candidates.first().copied()
    }

    /// All entities matching a symbolic name: exact short name, exact
    /// qualified name, or qualified-name suffix.
    fn candidates(&self, name: &str) -> Vec<&'a str> {
        if let Some(ids) = self.by_name.get(name) {
            return ids.clone();
        }
        let suffix = format!(".{}", name.rsplit('.').next().unwrap_or(name));
        self.entities
            .values()
            .filter(|e| e.qualified_name.ends_with(&suffix))
            .map(|e| e.id.as_str())
            .collect()
    }

    /// Calls resolve along a scope chain: enclosing class, same module,
    /// imported modules, then everything. Ties break by same-module match,
    /// most-specific qualified name, then lexicographic id. Runner-up
    /// candidates are preserved in an `alternates` attribute.
    fn resolve_call(&self, rel: &Relationship, name: &str) -> Relationship {
        let caller = self.entities.get(&rel.source_id);
        let caller_file = caller.map(|e| e.location.file_path.as_str());
        let caller_class = caller.and_then(|e| {
            e.qualified_name
                .rsplit_once('.')
                .map(|(class, _)| class.to_string())
        });

        let mut candidates: Vec<&Entity> = self
            .candidates(name)
            .into_iter()
            .filter_map(|id| self.entities.get(id))
            .filter(|e| {
                matches!(
                    e.kind,
                    EntityKind::Function | EntityKind::Method | EntityKind::Class
                )
            })
            .filter(|e| e.id != rel.source_id)
            .collect();

        if candidates.is_empty() {
            let mut unresolved = rel.clone();
            unresolved
                .attrs
                .insert("resolved".into(), AttrValue::Bool(false));
            return unresolved;
        }

        candidates.sort_by(|a, b| {
            self.call_rank(b, caller_file, caller_class.as_deref())
                .cmp(&self.call_rank(a, caller_file, caller_class.as_deref()))
                .then(
                    b.qualified_name
                        .matches('.')
                        .count()
                        .cmp(&a.qualified_name.matches('.').count()),
                )
                .then(a.id.cmp(&b.id))
        });

        let winner = candidates[0];
        let mut resolved = Relationship {
            source_id: rel.source_id.clone(),
            target_id: winner.id.clone(),
            kind: rel.kind,
            attrs: rel.attrs.clone(),
        };
        if candidates.len() > 1 {
            let alternates: Vec<&str> = candidates[1..].iter().map(|e| e.id.as_str()).collect();
            resolved
                .attrs
                .insert("alternates".into(), AttrValue::Str(alternates.join(",")));
        }
        resolved
    }

    fn call_rank(
        &self,
        candidate: &Entity,
        caller_file: Option<&str>,
        caller_class: Option<&str>,
    ) -> u8 {
        let same_file = caller_file == Some(candidate.location.file_path.as_str());
        let same_class = caller_class
            .map(|class| {
                candidate
                    .qualified_name
                    .rsplit_once('.')
                    .map(|(c, _)| c == class)
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if same_file && same_class {
            3
        } else if same_file {
            2
        } else if self.imported_by_caller(caller_file, candidate) {
            1
        } else {
            0
        }
    }

    fn imported_by_caller(&self, caller_file: Option<&str>, candidate: &Entity) -> bool {
        let Some(file) = caller_file else {
            return false;
        };
        let Some(imports) = self.module_imports.get(file) else {
            return false;
        };
        imports.iter().any(|module_id| {
            self.entities
                .get(module_id)
                .map(|m| m.location.file_path == candidate.location.file_path)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{symbolic_target, Location};

    fn entity(kind: EntityKind, file: &str, qname: &str) -> Entity {
        let name = qname.rsplit('.').next().unwrap().to_string();
        Entity::new(kind, name, qname, Location::new(file, 1, 5))
    }

    fn outcome(file: &str, entities: Vec<Entity>, relationships: Vec<Relationship>) -> ParseOutcome {
        ParseOutcome {
            file_path: file.to_string(),
            entities,
            relationships,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_call_resolves_to_same_file_candidate() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "a.py",
            vec![
                entity(EntityKind::Module, "a.py", "a"),
                entity(EntityKind::Function, "a.py", "helper"),
                entity(EntityKind::Function, "a.py", "main"),
            ],
            vec![Relationship::new(
                "a.py::main",
                symbolic_target("helper"),
                RelationshipKind::Calls,
            )],
        ));
        builder.merge(outcome(
            "b.py",
            vec![
                entity(EntityKind::Module, "b.py", "b"),
                entity(EntityKind::Function, "b.py", "helper"),
            ],
            vec![],
        ));

        let store = builder.build(None);
        let callees = store.get_callees("a.py::main");
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].id, "a.py::helper");
    }

    #[test]
    fn test_ambiguous_call_keeps_alternates() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "main.py",
            vec![
                entity(EntityKind::Module, "main.py", "main"),
                entity(EntityKind::Function, "main.py", "run"),
            ],
            vec![Relationship::new(
                "main.py::run",
                symbolic_target("helper"),
                RelationshipKind::Calls,
            )],
        ));
        builder.merge(outcome(
            "x.py",
            vec![entity(EntityKind::Function, "x.py", "helper")],
            vec![],
        ));
        builder.merge(outcome(
            "y.py",
            vec![entity(EntityKind::Function, "y.py", "helper")],
            vec![],
        ));

        let store = builder.build(None);
        let rels = store.relationships();
        let call = rels
            .iter()
            .find(|r| r.kind == RelationshipKind::Calls)
            .unwrap();
        // neither candidate is local; lexicographic id wins, loser is recorded
        assert_eq!(call.target_id, "x.py::helper");
        assert_eq!(
            call.attrs.get("alternates").and_then(|v| v.as_str()),
            Some("y.py::helper")
        );
    }

    #[test]
    fn test_method_call_prefers_enclosing_class() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "svc.py",
            vec![
                entity(EntityKind::Module, "svc.py", "svc"),
                entity(EntityKind::Class, "svc.py", "Service"),
                entity(EntityKind::Method, "svc.py", "Service.save"),
                entity(EntityKind::Method, "svc.py", "Service.run"),
                entity(EntityKind::Function, "svc.py", "save"),
            ],
            vec![Relationship::new(
                "svc.py::Service.run",
                symbolic_target("save"),
                RelationshipKind::Calls,
            )],
        ));

        let store = builder.build(None);
        let callees = store.get_callees("svc.py::Service.run");
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].id, "svc.py::Service.save");
    }

    #[test]
    fn test_unresolved_import_marked() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "a.py",
            vec![entity(EntityKind::Module, "a.py", "a")],
            vec![Relationship::new(
                "a.py::a",
                symbolic_target("os"),
                RelationshipKind::Imports,
            )],
        ));

        let store = builder.build(None);
        let rels = store.relationships();
        let import = rels
            .iter()
            .find(|r| r.kind == RelationshipKind::Imports)
            .unwrap();
        assert_eq!(import.target_id, "ref::os");
        assert_eq!(import.attrs.get("resolved"), Some(&AttrValue::Bool(false)));
    }

    #[test]
    fn test_inherits_resolves_to_class() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "base.py",
            vec![
                entity(EntityKind::Module, "base.py", "base"),
                entity(EntityKind::Class, "base.py", "Base"),
            ],
            vec![],
        ));
        builder.merge(outcome(
            "child.py",
            vec![
                entity(EntityKind::Module, "child.py", "child"),
                entity(EntityKind::Class, "child.py", "Child"),
            ],
            vec![Relationship::new(
                "child.py::Child",
                symbolic_target("Base"),
                RelationshipKind::Inherits,
            )],
        ));

        let store = builder.build(None);
        let parents = store.get_inherits("child.py::Child");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, "base.py::Base");
    }

    #[test]
    fn test_contains_forest_rejects_second_parent() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "m.py",
            vec![
                entity(EntityKind::Module, "m.py", "m"),
                entity(EntityKind::Class, "m.py", "A"),
                entity(EntityKind::Class, "m.py", "B"),
                entity(EntityKind::Method, "m.py", "A.f"),
            ],
            vec![
                Relationship::new("m.py::A", "m.py::A.f", RelationshipKind::Contains),
                Relationship::new("m.py::B", "m.py::A.f", RelationshipKind::Contains),
            ],
        ));

        let store = builder.build(None);
        assert_eq!(store.get_parent("m.py::A.f").unwrap().id, "m.py::A");
        assert!(store
            .metadata()
            .errors
            .iter()
            .any(|e| e.contains("containment conflict")));
    }

    #[test]
    fn test_contains_cycle_dropped() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "m.py",
            vec![
                entity(EntityKind::Class, "m.py", "A"),
                entity(EntityKind::Class, "m.py", "B"),
            ],
            vec![
                Relationship::new("m.py::A", "m.py::B", RelationshipKind::Contains),
                Relationship::new("m.py::B", "m.py::A", RelationshipKind::Contains),
            ],
        ));

        let store = builder.build(None);
        assert!(store.get_parent("m.py::A").is_none());
        assert_eq!(store.get_parent("m.py::B").unwrap().id, "m.py::A");
    }

    #[test]
    fn test_imported_module_scope_beats_global() {
        let mut builder = GraphBuilder::new();
        builder.merge(outcome(
            "app.py",
            vec![
                entity(EntityKind::Module, "app.py", "app"),
                entity(EntityKind::Function, "app.py", "main"),
            ],
            vec![
                Relationship::new(
                    "app.py::app",
                    symbolic_target("util"),
                    RelationshipKind::Imports,
                ),
                Relationship::new(
                    "app.py::main",
                    symbolic_target("clamp"),
                    RelationshipKind::Calls,
                ),
            ],
        ));
        builder.merge(outcome(
            "util.py",
            vec![
                entity(EntityKind::Module, "util.py", "util"),
                entity(EntityKind::Function, "util.py", "clamp"),
            ],
            vec![],
        ));
        builder.merge(outcome(
            "zz_other.py",
            vec![
                entity(EntityKind::Module, "zz_other.py", "zz_other"),
                entity(EntityKind::Function, "zz_other.py", "clamp"),
            ],
            vec![],
        ));

        let store = builder.build(None);
        let callees = store.get_callees("app.py::main");
        assert_eq!(callees[0].id, "util.py::clamp");
    }
}
