//! # KnowCode Indexer
//!
//! The orchestration layer: scan a repository, build the semantic graph
//! and the retrieval indexes, keep them fresh through a debounced
//! filesystem watcher, and expose the logical retrieval API.
//!
//! ## Pipeline
//!
//! ```text
//! root
//!  ├──> FileScanner (.gitignore + denylist + user patterns)
//!  ├──> ParserRegistry ──> GraphBuilder ──> KnowledgeStore ──> knowledge.json
//!  └──> Chunker ──> {ChunkStore, Bm25Index, EmbeddingClient -> VectorIndex}
//!                                 └──> .knowcode/index/{manifest,chunks,lexical,vectors}.json
//!
//! queries: Engine::retrieve_context_for_query / search_codebase /
//!          get_entity_context / trace_calls / get_impact
//! watch:   FileWatcher -> Engine::reindex_paths (remove-old, add-new)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use knowcode_indexer::{AnalyzeOptions, Engine, KnowCodeConfig, QueryOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::open("/path/to/project", KnowCodeConfig::offline(256)).await?;
//!     engine.analyze(&AnalyzeOptions::default()).await?;
//!     engine.build_index().await?;
//!
//!     let bundle = engine
//!         .retrieve_context_for_query("how does login work", &QueryOptions::default())
//!         .await?;
//!     println!("{} (sufficiency {:.2})", bundle.context_text, bundle.sufficiency_score);
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod error;
mod paths;
mod scanner;
mod stats;
mod watcher;

pub use config::{
    EmbeddingModelEntry, KnowCodeConfig, RerankingModelEntry, RetrievalDefaults,
};
pub use engine::{AnalyzeOptions, Engine, EntitySummary, QueryOptions};
pub use error::{IndexerError, Result};
pub use paths::{
    chunks_path, index_dir, knowcode_dir, knowledge_path, lexical_path, manifest_path,
    vectors_path, KNOWCODE_DIR_NAME,
};
pub use scanner::{FileScanner, ScannedFile, IGNORED_DIRS};
pub use stats::{AnalyzeStats, IndexStats};
pub use watcher::{FileWatcher, WatcherConfig};

// re-export the types that appear in the public API surface
pub use knowcode_graph::{ImpactReport, TraceDirection, TraceHop};
pub use knowcode_search::{ContextBundle, TaskType};
