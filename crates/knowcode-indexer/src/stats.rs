use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of an analyze run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeStats {
    pub files: usize,
    pub entities: usize,
    pub relationships: usize,
    /// Per-file parse errors; non-fatal
    pub errors: Vec<String>,
    pub languages: BTreeMap<String, usize>,
    pub time_ms: u64,
}

/// Result of an index build or incremental update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: usize,
    pub files_skipped: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub chunks_total: usize,
    pub embedded: usize,
    pub errors: Vec<String>,
    pub time_ms: u64,
}

impl AnalyzeStats {
    pub fn add_file(&mut self, language: &str) {
        self.files += 1;
        *self.languages.entry(language.to_string()).or_insert(0) += 1;
    }
}
