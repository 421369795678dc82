use crate::error::{IndexerError, Result};
use knowcode_index::{EmbeddingConfig, HybridConfig, ProviderKind, Reranker, VoyageReranker};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One embedding model entry in `knowcode.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModelEntry {
    pub name: String,
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// One reranking model entry in `knowcode.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankingModelEntry {
    pub name: String,
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default = "default_voyage_key_env")]
    pub api_key_env: String,
}

/// Retrieval defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDefaults {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_expand_deps")]
    pub expand_deps: bool,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            top_n: default_top_n(),
            expand_deps: default_expand_deps(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_rerank_provider() -> String {
    "voyageai".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_voyage_key_env() -> String {
    "VOYAGE_API_KEY".to_string()
}
fn default_dimensions() -> usize {
    1536
}
fn default_batch_size() -> usize {
    100
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_top_n() -> usize {
    10
}
fn default_expand_deps() -> bool {
    true
}
fn default_sufficiency_threshold() -> f32 {
    0.8
}

/// Engine configuration, loaded from `knowcode.yaml`. Credentials are
/// never stored here — entries name the environment variable that holds
/// them, and a missing credential degrades the feature instead of
/// failing the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowCodeConfig {
    #[serde(default)]
    pub embedding_models: Vec<EmbeddingModelEntry>,
    #[serde(default)]
    pub reranking_models: Vec<RerankingModelEntry>,
    #[serde(default)]
    pub retrieval: RetrievalDefaults,
    #[serde(default = "default_sufficiency_threshold")]
    pub sufficiency_threshold: f32,
}

impl KnowCodeConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                sufficiency_threshold: default_sufficiency_threshold(),
                ..Default::default()
            });
        }
        let text = tokio::fs::read_to_string(path).await?;
        serde_yaml::from_str(&text)
            .map_err(|e| IndexerError::ConfigError(format!("{}: {e}", path.display())))
    }

    /// Offline configuration backed by the deterministic stub embedder.
    pub fn offline(dimension: usize) -> Self {
        Self {
            embedding_models: vec![EmbeddingModelEntry {
                name: "stub".to_string(),
                provider: "stub".to_string(),
                api_key_env: String::new(),
                dimensions: dimension,
                batch_size: 64,
            }],
            sufficiency_threshold: default_sufficiency_threshold(),
            ..Default::default()
        }
    }

    /// First embedding model whose credential is available.
    /// `None` disables semantic retrieval (lexical-only fallback).
    pub fn select_embedding(&self) -> Option<EmbeddingConfig> {
        for entry in &self.embedding_models {
            let provider = match entry.provider.to_lowercase().as_str() {
                "openai" => ProviderKind::OpenAi,
                "voyageai" | "voyage" => ProviderKind::VoyageAi,
                "stub" => ProviderKind::Stub,
                other => {
                    log::warn!("Unknown embedding provider '{other}', skipping");
                    continue;
                }
            };
            if provider != ProviderKind::Stub && std::env::var(&entry.api_key_env).is_err() {
                log::info!(
                    "Embedding model {} skipped: {} not set",
                    entry.name,
                    entry.api_key_env
                );
                continue;
            }
            return Some(EmbeddingConfig {
                provider,
                model_name: entry.name.clone(),
                api_key_env: entry.api_key_env.clone(),
                dimension: entry.dimensions,
                batch_size: entry.batch_size,
                ..EmbeddingConfig::stub(entry.dimensions)
            });
        }
        None
    }

    /// First usable reranker; falls back to the local signal reranker
    /// when a model is configured but its credential is missing.
    pub fn select_reranker(&self) -> Option<Reranker> {
        let entry = self.reranking_models.first()?;
        match VoyageReranker::new(&entry.name, &entry.api_key_env) {
            Ok(voyage) => Some(Reranker::VoyageAi(voyage)),
            Err(e) => {
                log::info!("Reranker {} unavailable ({e}); using local signals", entry.name);
                Some(Reranker::Signals)
            }
        }
    }

    pub fn hybrid_config(&self) -> HybridConfig {
        HybridConfig {
            rrf_k: self.retrieval.rrf_k,
            top_n: self.retrieval.top_n,
            ..HybridConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
embedding_models:
  - name: voyage-code-3
    provider: voyageai
    api_key_env: VOYAGE_API_KEY
    dimensions: 1024
reranking_models:
  - name: rerank-2.5
retrieval:
  rrf_k: 60
  top_n: 8
  expand_deps: false
sufficiency_threshold: 0.75
"#;
        let config: KnowCodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.embedding_models[0].dimensions, 1024);
        assert_eq!(config.retrieval.top_n, 8);
        assert!(!config.retrieval.expand_deps);
        assert!((config.sufficiency_threshold - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_missing_credential_skips_model() {
        let config = KnowCodeConfig {
            embedding_models: vec![EmbeddingModelEntry {
                name: "text-embedding-3-small".to_string(),
                provider: "openai".to_string(),
                api_key_env: "KNOWCODE_TEST_UNSET_KEY".to_string(),
                dimensions: 1536,
                batch_size: 100,
            }],
            ..Default::default()
        };
        assert!(config.select_embedding().is_none());
    }

    #[test]
    fn test_offline_config_selects_stub() {
        let config = KnowCodeConfig::offline(128);
        let embedding = config.select_embedding().unwrap();
        assert_eq!(embedding.provider, ProviderKind::Stub);
        assert_eq!(embedding.dimension, 128);
    }
}
