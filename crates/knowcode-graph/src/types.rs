use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a code entity tracked by the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Source file / Python module / Java compilation unit / document
    Module,
    /// Class, interface, or enum declaration
    Class,
    /// Top-level function
    Function,
    /// Function owned by a class
    Method,
    /// Top-level variable, constant, or document section
    Variable,
    /// Configuration key from YAML/JSON files
    ConfigKey,
    /// HTTP route handler detected in source
    ApiEndpoint,
    /// Version-control commit (temporal ingestion)
    Commit,
    /// Version-control author (temporal ingestion)
    Author,
    /// Coverage report artifact (coverage ingestion)
    CoverageReport,
    /// Placeholder emitted for a region the frontend could not parse
    ParseError,
}

impl EntityKind {
    /// Stable string form, matching the persisted document.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Variable => "variable",
            EntityKind::ConfigKey => "config_key",
            EntityKind::ApiEndpoint => "api_endpoint",
            EntityKind::Commit => "commit",
            EntityKind::Author => "author",
            EntityKind::CoverageReport => "coverage_report",
            EntityKind::ParseError => "parse_error",
        }
    }

    /// Ranking preference when breaking retrieval ties
    /// (functions and methods beat classes beat modules).
    pub fn retrieval_rank(self) -> u8 {
        match self {
            EntityKind::Function | EntityKind::Method => 3,
            EntityKind::Class => 2,
            EntityKind::Module => 1,
            _ => 0,
        }
    }
}

/// Kind of a directed relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Caller invokes callee
    Calls,
    /// Module imports another module
    Imports,
    /// Structural containment (module -> class -> method); forms a forest
    Contains,
    /// Class extends / implements another class
    Inherits,
    /// Author -> commit
    Authored,
    /// Commit -> entity it touched
    Modified,
    /// Entity -> commit that touched it
    ChangedBy,
    /// Coverage report -> covered entity
    Covers,
    /// Entity -> coverage report that executed it
    ExecutedBy,
}

impl RelationshipKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::Calls => "calls",
            RelationshipKind::Imports => "imports",
            RelationshipKind::Contains => "contains",
            RelationshipKind::Inherits => "inherits",
            RelationshipKind::Authored => "authored",
            RelationshipKind::Modified => "modified",
            RelationshipKind::ChangedBy => "changed_by",
            RelationshipKind::Covers => "covers",
            RelationshipKind::ExecutedBy => "executed_by",
        }
    }
}

/// A typed attribute value. Kept as a tagged variant (not a free-form JSON
/// blob) so downstream consumers can evolve fields with a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Ordered attribute bag; ordering keeps persisted documents deterministic.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Source location of an entity. Lines are 1-based, end inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Location {
    pub fn new(file_path: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            file_path: file_path.into(),
            start_line,
            end_line: end_line.max(start_line),
        }
    }

    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// A semantic code entity (module, class, function, ...).
///
/// The id is stable across runs: `<normalized file path>::<qualified name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    /// Short name (e.g. `authenticate`)
    pub name: String,
    /// Fully qualified name (e.g. `AuthService.authenticate`)
    pub qualified_name: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Attrs::is_empty")]
    pub attrs: Attrs,
}

impl Entity {
    /// Build the canonical entity id from a file path and qualified name.
    pub fn make_id(file_path: &str, qualified_name: &str) -> String {
        format!("{}::{}", normalize_path(file_path), qualified_name)
    }

    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        location: Location,
    ) -> Self {
        let name = name.into();
        let qualified_name = qualified_name.into();
        Self {
            id: Self::make_id(&location.file_path, &qualified_name),
            kind,
            name,
            qualified_name,
            location,
            source_code: None,
            docstring: None,
            signature: None,
            attrs: Attrs::new(),
        }
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_code = Some(source.into());
        self
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Attrs::is_empty")]
    pub attrs: Attrs,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// True while the target is still a symbolic `ref::` placeholder.
    pub fn is_symbolic(&self) -> bool {
        self.target_id.starts_with(SYMBOLIC_PREFIX)
    }
}

/// Prefix frontends use for targets they cannot resolve locally.
/// Resolution to concrete entity ids happens in the graph builder.
pub const SYMBOLIC_PREFIX: &str = "ref::";

/// Wrap a symbolic name into an unresolved target id.
pub fn symbolic_target(name: &str) -> String {
    format!("{SYMBOLIC_PREFIX}{name}")
}

/// Output of parsing a single file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub file_path: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub errors: Vec<String>,
}

impl ParseOutcome {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn failed(file_path: impl Into<String>, error: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let error = error.into();
        let mut outcome = Self::new(file_path.clone());
        let mut entity = Entity::new(
            EntityKind::ParseError,
            "parse_error",
            "parse_error",
            Location::new(file_path, 1, 1),
        );
        entity.attrs.insert("reason".into(), error.clone().into());
        outcome.entities.push(entity);
        outcome.errors.push(error);
        outcome
    }
}

/// Normalize a path for use in entity ids: forward slashes, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_is_path_and_qualified_name() {
        let loc = Location::new("src/auth.py", 10, 20);
        let entity = Entity::new(EntityKind::Method, "login", "AuthService.login", loc);
        assert_eq!(entity.id, "src/auth.py::AuthService.login");
    }

    #[test]
    fn test_location_clamps_end_line() {
        let loc = Location::new("a.py", 9, 3);
        assert_eq!(loc.end_line, 9);
        assert!(loc.contains_line(9));
        assert!(!loc.contains_line(10));
    }

    #[test]
    fn test_symbolic_target_roundtrip() {
        let rel = Relationship::new("a", symbolic_target("helper"), RelationshipKind::Calls);
        assert!(rel.is_symbolic());
        assert_eq!(rel.target_id, "ref::helper");
    }

    #[test]
    fn test_attr_value_serialization_is_untagged() {
        let mut attrs = Attrs::new();
        attrs.insert("line".into(), AttrValue::Int(42));
        attrs.insert("resolved".into(), AttrValue::Bool(false));
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"line":42,"resolved":false}"#);
    }

    #[test]
    fn test_parse_error_outcome_carries_entity() {
        let outcome = ParseOutcome::failed("bad.py", "syntax error at line 3");
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].kind, EntityKind::ParseError);
        assert_eq!(outcome.errors.len(), 1);
    }
}
