use crate::embedding::normalize;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Version of the persisted vector index. Readers reject anything newer.
pub const VECTOR_SCHEMA_VERSION: u32 = 2;

/// Dense nearest-neighbor index over fixed-dimension vectors.
///
/// Exhaustive inner-product search over unit vectors (= cosine). Slots map
/// to chunk ids through `id_map`; the map is persisted next to the vectors
/// and restored on load — never reset — so results survive a round-trip.
pub struct VectorIndex {
    dimension: usize,
    next_slot: usize,
    vectors: HashMap<usize, Vec<f32>>,
    id_map: HashMap<usize, String>,
    slot_of: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct PersistedVectorIndex {
    schema_version: u32,
    dimension: usize,
    next_slot: usize,
    id_map: BTreeMap<usize, String>,
    vectors: BTreeMap<usize, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            next_slot: 0,
            vectors: HashMap::new(),
            id_map: HashMap::new(),
            slot_of: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.slot_of.contains_key(chunk_id)
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slot_of.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Add or replace the vector for a chunk. The vector is normalized so
    /// search scores are cosine similarities.
    pub fn add(&mut self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let slot = match self.slot_of.get(chunk_id) {
            Some(&slot) => slot,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.slot_of.insert(chunk_id.to_string(), slot);
                self.id_map.insert(slot, chunk_id.to_string());
                slot
            }
        };
        self.vectors.insert(slot, normalize(vector));
        Ok(())
    }

    /// Remove a chunk's vector. Unknown ids are a no-op.
    pub fn remove(&mut self, chunk_id: &str) {
        if let Some(slot) = self.slot_of.remove(chunk_id) {
            self.vectors.remove(&slot);
            self.id_map.remove(&slot);
        }
    }

    /// Top-k most similar chunks, scored by inner product, descending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scores: Vec<(String, f32)> = self
            .vectors
            .iter()
            .filter_map(|(slot, vector)| {
                let id = self.id_map.get(slot)?;
                let score: f32 = query.iter().zip(vector).map(|(a, b)| a * b).sum();
                Some((id.clone(), score))
            })
            .collect();
        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(k);
        Ok(scores)
    }

    /// Drop vectors whose chunk id fails `keep`. Returns pruned ids; the
    /// loader uses this to repair orphaned vectors.
    pub fn prune<F: Fn(&str) -> bool>(&mut self, keep: F) -> Vec<String> {
        let doomed: Vec<String> = self
            .slot_of
            .keys()
            .filter(|id| !keep(id))
            .cloned()
            .collect();
        for id in &doomed {
            self.remove(id);
        }
        doomed
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let doc = PersistedVectorIndex {
            schema_version: VECTOR_SCHEMA_VERSION,
            dimension: self.dimension,
            next_slot: self.next_slot,
            id_map: self.id_map.iter().map(|(k, v)| (*k, v.clone())).collect(),
            vectors: self.vectors.iter().map(|(k, v)| (*k, v.clone())).collect(),
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
        let doc: PersistedVectorIndex = serde_json::from_str(&data)?;
        if doc.schema_version > VECTOR_SCHEMA_VERSION {
            return Err(IndexError::SchemaMismatch(format!(
                "vector index version {} is newer than supported {}",
                doc.schema_version, VECTOR_SCHEMA_VERSION
            )));
        }

        let mut index = Self::new(doc.dimension);
        index.next_slot = doc.next_slot;
        // restore the id map before touching vectors: a vector without an
        // id entry is an orphan and gets dropped here
        let mut orphans = 0usize;
        for (slot, chunk_id) in doc.id_map {
            index.slot_of.insert(chunk_id.clone(), slot);
            index.id_map.insert(slot, chunk_id);
        }
        for (slot, vector) in doc.vectors {
            if index.id_map.contains_key(&slot) {
                index.vectors.insert(slot, vector);
            } else {
                orphans += 1;
            }
        }
        // id entries without vectors are equally inconsistent; drop them
        let missing: Vec<usize> = index
            .id_map
            .keys()
            .filter(|slot| !index.vectors.contains_key(slot))
            .copied()
            .collect();
        for slot in missing {
            if let Some(id) = index.id_map.remove(&slot) {
                index.slot_of.remove(&id);
                orphans += 1;
            }
        }
        if orphans > 0 {
            log::warn!("Vector index load pruned {orphans} inconsistent entries");
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new(4);
        index.add("a", unit(4, 0)).unwrap();
        index.add("b", vec![0.9, 0.1, 0.0, 0.0]).unwrap();
        index.add("c", unit(4, 2)).unwrap();

        let results = index.search(&unit(4, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(results[1].0, "b");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = VectorIndex::new(4);
        assert!(index.add("a", vec![1.0, 0.0]).is_err());
        index.add("a", unit(4, 0)).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_remove_then_search() {
        let mut index = VectorIndex::new(4);
        index.add("a", unit(4, 0)).unwrap();
        index.add("b", unit(4, 1)).unwrap();
        index.remove("a");
        let results = index.search(&unit(4, 0), 5).unwrap();
        assert!(results.iter().all(|(id, _)| id != "a"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_replace_existing_vector_keeps_slot_count() {
        let mut index = VectorIndex::new(4);
        index.add("a", unit(4, 0)).unwrap();
        index.add("a", unit(4, 1)).unwrap();
        assert_eq!(index.len(), 1);
        let results = index.search(&unit(4, 1), 1).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_id_map_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");

        let mut index = VectorIndex::new(8);
        for i in 0..6 {
            index.add(&format!("chunk{i}"), unit(8, i)).unwrap();
        }
        let before = index.search(&unit(8, 3), 3).unwrap();
        index.save(&path).await.unwrap();

        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 6);
        assert!(!loaded.chunk_ids().is_empty(), "id_map must be restored on load");
        let after = loaded.search(&unit(8, 3), 3).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_load_prunes_orphaned_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");

        let mut index = VectorIndex::new(4);
        index.add("keep", unit(4, 0)).unwrap();
        index.add("orphan", unit(4, 1)).unwrap();
        index.save(&path).await.unwrap();

        // corrupt: drop "orphan" from the id_map only
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let id_map = doc["id_map"].as_object_mut().unwrap();
        let orphan_slot = id_map
            .iter()
            .find(|(_, v)| v.as_str() == Some("orphan"))
            .map(|(k, _)| k.clone())
            .unwrap();
        id_map.remove(&orphan_slot);
        std::fs::write(&path, doc.to_string()).unwrap();

        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.chunk_ids(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let index = VectorIndex::new(4);
        index.save(&path).await.unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["schema_version"] = serde_json::json!(VECTOR_SCHEMA_VERSION + 1);
        std::fs::write(&path, doc.to_string()).unwrap();

        assert!(matches!(
            VectorIndex::load(&path).await,
            Err(IndexError::SchemaMismatch(_))
        ));
    }
}
