//! # KnowCode Graph
//!
//! The semantic graph layer: typed entities and relationships extracted from
//! source, an in-memory knowledge store with persistence, and the resolution
//! pass that turns symbolic references into concrete edges.
//!
//! ## Architecture
//!
//! ```text
//! ParseOutcome[]  (one per file, from parser frontends)
//!     │
//!     ├──> Graph Builder
//!     │      ├─ Merge entities / relationships
//!     │      ├─ Resolve ref:: targets (scope chain, alternates)
//!     │      └─ Verify contains-forest invariant
//!     │
//!     ├──> Knowledge Store (petgraph)
//!     │      ├─ O(1) id lookup, substring search
//!     │      ├─ One-hop traversals (callers, callees, children, ...)
//!     │      ├─ trace_calls (BFS, cycle-safe) / get_impact (risk score)
//!     │      └─ JSON persistence with schema versioning
//!     │
//!     └──> Optional passes
//!            ├─ Temporal: git history -> commit/author entities
//!            └─ Coverage: Cobertura XML -> covers/executed_by edges
//! ```

mod builder;
mod coverage;
mod error;
mod store;
mod temporal;
mod types;

pub use builder::GraphBuilder;
pub use coverage::CoverageIngestor;
pub use error::{GraphError, Result};
pub use store::{
    ImpactReport, KnowledgeStore, ScanMetadata, TraceDirection, TraceHop,
    KNOWLEDGE_SCHEMA_VERSION, RISK_SPREAD_WEIGHT, RISK_TRANSITIVE_WEIGHT,
};
pub use temporal::{
    author_entity_id, commit_entity_id, GitHistoryAnalyzer, DEFAULT_COMMIT_LIMIT,
};
pub use types::{
    normalize_path, symbolic_target, AttrValue, Attrs, Entity, EntityKind, Location,
    ParseOutcome, Relationship, RelationshipKind, SYMBOLIC_PREFIX,
};
