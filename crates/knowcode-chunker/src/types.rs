use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of retrieval chunk derived from one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// File path, module docstring, and leading comment
    ModuleHeader,
    /// Concatenated import statements
    Imports,
    /// One top-level entity (class, function, or split-out method)
    Entity,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::ModuleHeader => "module_header",
            ChunkKind::Imports => "imports",
            ChunkKind::Entity => "entity",
        }
    }
}

/// A retrieval unit tied to at most one entity. Chunks never cross file
/// boundaries and their ids are pure functions of their inputs, so
/// re-chunking identical source yields identical ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub kind: ChunkKind,
    /// Backing entity; None for module_header / imports chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    /// Hash of `text`, used to detect stale chunks on re-index
    pub content_hash: String,
}

impl Chunk {
    pub fn new(
        kind: ChunkKind,
        entity_id: Option<String>,
        file_path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        text: impl Into<String>,
        qualifier: &str,
    ) -> Self {
        let file_path = file_path.into();
        let text = text.into();
        Self {
            id: chunk_id(&file_path, kind, qualifier),
            kind,
            entity_id,
            file_path,
            start_line,
            end_line: end_line.max(start_line),
            text: text.clone(),
            content_hash: content_hash(&text),
        }
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Deterministic chunk id: sha-256 over (file path, kind, qualifier),
/// where the qualifier is the entity's qualified name or the chunk span.
pub fn chunk_id(file_path: &str, kind: ChunkKind, qualifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(qualifier.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("ck_{hex}")
}

/// Short content hash for change detection.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
