use crate::error::{IndexError, Result};
use knowcode_chunker::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Version of the persisted chunk metadata file.
pub const CHUNK_STORE_SCHEMA_VERSION: u32 = 2;

/// In-memory chunk repository with entity and file secondary indexes.
#[derive(Default)]
pub struct ChunkStore {
    chunks: HashMap<String, Chunk>,
    by_entity: HashMap<String, Vec<String>>,
    by_file: HashMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedChunks {
    schema_version: u32,
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunks.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chunks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn insert(&mut self, chunk: Chunk) {
        self.remove(&chunk.id.clone());
        if let Some(entity_id) = &chunk.entity_id {
            self.by_entity
                .entry(entity_id.clone())
                .or_default()
                .push(chunk.id.clone());
        }
        self.by_file
            .entry(chunk.file_path.clone())
            .or_default()
            .push(chunk.id.clone());
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    pub fn remove(&mut self, chunk_id: &str) -> Option<Chunk> {
        let chunk = self.chunks.remove(chunk_id)?;
        if let Some(entity_id) = &chunk.entity_id {
            if let Some(ids) = self.by_entity.get_mut(entity_id) {
                ids.retain(|id| id != chunk_id);
                if ids.is_empty() {
                    self.by_entity.remove(entity_id);
                }
            }
        }
        if let Some(ids) = self.by_file.get_mut(&chunk.file_path) {
            ids.retain(|id| id != chunk_id);
            if ids.is_empty() {
                self.by_file.remove(&chunk.file_path);
            }
        }
        Some(chunk)
    }

    /// All chunks backing an entity, sorted by id.
    pub fn get_by_entity(&self, entity_id: &str) -> Vec<&Chunk> {
        let mut chunks: Vec<&Chunk> = self
            .by_entity
            .get(entity_id)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        chunks
    }

    pub fn chunk_ids_for_file(&self, file_path: &str) -> Vec<String> {
        let mut ids = self.by_file.get(file_path).cloned().unwrap_or_default();
        ids.sort();
        ids
    }

    /// Remove every chunk of a file; returns the removed ids so the caller
    /// can mirror the removal into the vector and lexical indexes.
    pub fn remove_file(&mut self, file_path: &str) -> Vec<String> {
        let ids = self.chunk_ids_for_file(file_path);
        for id in &ids {
            self.remove(id);
        }
        ids
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut chunks: Vec<Chunk> = self.chunks.values().cloned().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let doc = PersistedChunks {
            schema_version: CHUNK_STORE_SCHEMA_VERSION,
            chunks,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string(&doc)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        let doc: PersistedChunks = serde_json::from_str(&data)?;
        if doc.schema_version > CHUNK_STORE_SCHEMA_VERSION {
            return Err(IndexError::SchemaMismatch(format!(
                "chunk store version {} is newer than supported {}",
                doc.schema_version, CHUNK_STORE_SCHEMA_VERSION
            )));
        }
        let mut store = Self::new();
        for chunk in doc.chunks {
            store.insert(chunk);
        }
        Ok(store)
    }
}
