//! # KnowCode Search
//!
//! The query side of the engine: classify the task, retrieve chunks through
//! the hybrid index, map them to anchor entities, expand one hop through
//! the call graph, and synthesize a token-budgeted context bundle with a
//! sufficiency score.
//!
//! ## Pipeline
//!
//! ```text
//! query
//!   ├─ classify (explain | debug | extend | review | locate | general)
//!   ├─ retrieve: BM25 + vectors ─ RRF ─ optional rerank
//!   ├─ anchor: chunk -> entity (module for header/import chunks)
//!   ├─ score entities, keep top N, expand callers/callees at 0.3x
//!   └─ synthesize: sections by task priority, truncate under budget,
//!      sufficiency = w1·retrieval + w2·coverage + w3·fill − w4·truncation
//! ```

mod engine;
mod error;
mod synthesizer;
mod task;
mod tokens;

pub use engine::{
    Evidence, RankedEntity, RetrievalMode, RetrievalOutput, SearchContext, SearchEngine,
    SearchOptions, EXPANSION_WEIGHT,
};
pub use error::{Result, SearchError};
pub use synthesizer::{
    sufficiency_score, ContextBundle, ContextSynthesizer, MIN_SECTION_TOKENS,
    SUFFICIENCY_W_BUDGET, SUFFICIENCY_W_COVERAGE, SUFFICIENCY_W_RETRIEVAL,
    SUFFICIENCY_W_TRUNCATION, TRUNCATION_MARKER,
};
pub use task::{classify_query, resolve_task_type, section_priorities, Section, TaskType};
pub use tokens::{estimate_tokens, whole_line_prefix};
