//! # KnowCode Chunker
//!
//! Splits parsed files into the three retrieval-unit kinds the indexes
//! consume: a module header, an imports block, and one chunk per top-level
//! entity. Chunk ids are pure functions of (file path, kind, qualifier), so
//! identical inputs produce identical ids across runs — the property
//! incremental re-indexing depends on.

mod chunker;
mod config;
mod error;
mod types;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use types::{chunk_id, content_hash, Chunk, ChunkKind};
