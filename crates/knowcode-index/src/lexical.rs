use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Version of the persisted lexical index. Readers reject anything newer.
pub const LEXICAL_SCHEMA_VERSION: u32 = 2;

/// Standard BM25 term-frequency saturation parameter.
pub const BM25_K1: f32 = 1.2;
/// Standard BM25 length-normalization parameter.
pub const BM25_B: f32 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    len: usize,
    term_freq: BTreeMap<String, u32>,
}

/// BM25 sparse index over tokenized chunk texts.
///
/// Documents are added and removed at chunk-id granularity so the watcher
/// can update incrementally. The persisted form carries enough state
/// (postings + document lengths) to score without re-reading source.
pub struct Bm25Index {
    k1: f32,
    b: f32,
    docs: HashMap<String, DocEntry>,
    doc_freq: HashMap<String, u32>,
    total_len: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedLexicalIndex {
    schema_version: u32,
    k1: f32,
    b: f32,
    docs: BTreeMap<String, DocEntry>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
            docs: HashMap::new(),
            doc_freq: HashMap::new(),
            total_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.docs.contains_key(chunk_id)
    }

    /// Index a chunk's tokens, replacing any previous entry for the id.
    pub fn add(&mut self, chunk_id: &str, tokens: &[String]) {
        self.remove(chunk_id);

        let mut term_freq: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *term_freq.entry(token.clone()).or_insert(0) += 1;
        }
        for term in term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += tokens.len();
        self.docs.insert(
            chunk_id.to_string(),
            DocEntry {
                len: tokens.len(),
                term_freq,
            },
        );
    }

    /// Remove a chunk. Unknown ids are a no-op.
    pub fn remove(&mut self, chunk_id: &str) {
        let Some(entry) = self.docs.remove(chunk_id) else {
            return;
        };
        self.total_len -= entry.len;
        for term in entry.term_freq.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
    }

    /// Score all documents against the query tokens; top `limit` hits,
    /// descending. Ties break on chunk id for stable output.
    pub fn search(&self, query_tokens: &[String], limit: usize) -> Vec<(String, f32)> {
        if self.docs.is_empty() || query_tokens.is_empty() {
            return Vec::new();
        }
        let total_docs = self.docs.len() as f32;
        let avg_len = (self.total_len as f32 / total_docs).max(1e-3);

        let mut hits: Vec<(String, f32)> = self
            .docs
            .iter()
            .filter_map(|(id, entry)| {
                let score = self.score_doc(entry, query_tokens, total_docs, avg_len);
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        hits
    }

    fn score_doc(
        &self,
        entry: &DocEntry,
        query_tokens: &[String],
        total_docs: f32,
        avg_len: f32,
    ) -> f32 {
        let dl = entry.len as f32;
        let mut score = 0.0;
        for token in query_tokens {
            let Some(&tf) = entry.term_freq.get(token) else {
                continue;
            };
            let tf = tf as f32;
            let df = self.doc_freq.get(token).copied().unwrap_or(0) as f32;
            let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + self.k1 * (1.0 - self.b + self.b * dl / avg_len);
            score += idf * (tf * (self.k1 + 1.0)) / denom;
        }
        score
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let doc = PersistedLexicalIndex {
            schema_version: LEXICAL_SCHEMA_VERSION,
            k1: self.k1,
            b: self.b,
            docs: self.docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
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
        let doc: PersistedLexicalIndex = serde_json::from_str(&data)?;
        if doc.schema_version > LEXICAL_SCHEMA_VERSION {
            return Err(IndexError::SchemaMismatch(format!(
                "lexical index version {} is newer than supported {}",
                doc.schema_version, LEXICAL_SCHEMA_VERSION
            )));
        }

        let mut index = Self {
            k1: doc.k1,
            b: doc.b,
            docs: HashMap::new(),
            doc_freq: HashMap::new(),
            total_len: 0,
        };
        // doc_freq and total_len are derived state; rebuild from postings
        for (id, entry) in doc.docs {
            for term in entry.term_freq.keys() {
                *index.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            index.total_len += entry.len;
            index.docs.insert(id, entry);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize_code;

    fn add_doc(index: &mut Bm25Index, id: &str, text: &str) {
        index.add(id, &tokenize_code(text));
    }

    fn sample_index() -> Bm25Index {
        let mut index = Bm25Index::new();
        add_doc(&mut index, "c1", "def parse_config(path): read yaml config file");
        add_doc(&mut index, "c2", "def render_template(name): html template engine");
        add_doc(&mut index, "c3", "class ConfigLoader: load config from disk");
        index
    }

    #[test]
    fn test_search_ranks_matching_docs() {
        let index = sample_index();
        let hits = index.search(&tokenize_code("parse config"), 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "c1", "doc with both terms ranks first");
        assert!(hits.iter().any(|(id, _)| id == "c3"));
        assert!(hits.iter().all(|(id, _)| id != "c2"));
    }

    #[test]
    fn test_rare_term_outweighs_common() {
        let mut index = sample_index();
        add_doc(&mut index, "c4", "config config config everywhere");
        let hits = index.search(&tokenize_code("template"), 10);
        assert_eq!(hits[0].0, "c2");
    }

    #[test]
    fn test_remove_updates_postings() {
        let mut index = sample_index();
        index.remove("c1");
        assert_eq!(index.len(), 2);
        let hits = index.search(&tokenize_code("parse"), 10);
        assert!(hits.iter().all(|(id, _)| id != "c1"));
        // removing again is a no-op
        index.remove("c1");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_re_add_replaces_entry() {
        let mut index = sample_index();
        add_doc(&mut index, "c1", "completely different words now");
        assert_eq!(index.len(), 3);
        let hits = index.search(&tokenize_code("parse_config"), 10);
        assert!(hits.iter().all(|(id, _)| id != "c1"));
    }

    #[test]
    fn test_empty_query_and_empty_index() {
        let index = Bm25Index::new();
        assert!(index.search(&tokenize_code("anything"), 5).is_empty());
        let index = sample_index();
        assert!(index.search(&[], 5).is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip_scores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");

        let index = sample_index();
        let before = index.search(&tokenize_code("config loader"), 5);
        index.save(&path).await.unwrap();

        let loaded = Bm25Index::load(&path).await.unwrap();
        let after = loaded.search(&tokenize_code("config loader"), 5);
        assert_eq!(before, after);
    }
}
