//! # KnowCode Index
//!
//! The retrieval substrate: chunk storage, a dense vector index, a BM25
//! lexical index, and hybrid fusion with optional reranking.
//!
//! ## Architecture
//!
//! ```text
//! Chunk[]
//!     │
//!     ├──> Chunk Store (id / entity / file indexes)
//!     │
//!     ├──> Embedding Client (openai | voyageai | stub)
//!     │      └─> Vector Index (cosine over unit vectors, slot id_map)
//!     │
//!     ├──> Tokenizer ──> BM25 Index (k1=1.2, b=0.75)
//!     │
//!     └──> rrf_fuse(lexical, dense) ──> optional Reranker
//!                                          └─ fused order on failure
//! ```
//!
//! Every persisted artifact carries a schema version and is written
//! atomically; the manifest guards model/dimension/provider agreement.

mod embedding;
mod error;
mod hybrid;
mod lexical;
mod manifest;
mod store;
mod tokenize;
mod vector;

pub use embedding::{
    normalize, stub_embedding, EmbeddingClient, EmbeddingConfig, ProviderKind,
};
pub use error::{IndexError, Result};
pub use hybrid::{
    rrf_fuse, FusedHit, HybridConfig, Reranker, VoyageReranker, DEFAULT_RRF_K,
};
pub use lexical::{Bm25Index, BM25_B, BM25_K1, LEXICAL_SCHEMA_VERSION};
pub use manifest::{IndexManifest, MANIFEST_SCHEMA_VERSION};
pub use store::{ChunkStore, CHUNK_STORE_SCHEMA_VERSION};
pub use tokenize::tokenize_code;
pub use vector::{VectorIndex, VECTOR_SCHEMA_VERSION};
