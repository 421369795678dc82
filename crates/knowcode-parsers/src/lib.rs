//! # KnowCode Parsers
//!
//! Per-language parser frontends producing the canonical entity +
//! local-relation view the graph builder consumes.
//!
//! ## Pipeline position
//!
//! ```text
//! source text ──> ParserRegistry ──> ParseOutcome (entities, ref:: relations)
//!                      │
//!                      ├─ Python / JavaScript / TypeScript / Java (tree-sitter)
//!                      ├─ Markdown (headings -> contained entities)
//!                      └─ YAML (mapping keys -> config_key entities)
//! ```
//!
//! Frontends never resolve cross-file references; call and inheritance
//! targets are emitted as `ref::Name` placeholders. Unparseable files yield
//! a `parse_error` entity rather than disappearing.

mod ast;
mod error;
mod frontend;
mod java;
mod javascript;
mod language;
mod markdown;
mod python;
mod yaml;

pub use error::{ParserError, Result};
pub use frontend::{ParserFrontend, ParserRegistry};
pub use java::JavaFrontend;
pub use javascript::JsFrontend;
pub use language::Language;
pub use markdown::MarkdownFrontend;
pub use python::PythonFrontend;
pub use yaml::YamlFrontend;
