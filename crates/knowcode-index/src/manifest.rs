use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version of the manifest document. Readers reject anything newer.
pub const MANIFEST_SCHEMA_VERSION: u32 = 2;

/// Describes a persisted index. An index whose manifest disagrees with the
/// active configuration must be rebuilt, never loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub model_name: String,
    pub dimension: usize,
    pub provider: String,
    pub chunk_count: usize,
    /// Hash over the indexed source set, for staleness detection
    pub source_hash: String,
}

impl IndexManifest {
    pub fn new(
        model_name: impl Into<String>,
        dimension: usize,
        provider: impl Into<String>,
        chunk_count: usize,
        source_hash: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            model_name: model_name.into(),
            dimension,
            provider: provider.into(),
            chunk_count,
            source_hash: source_hash.into(),
        }
    }

    /// Verify the manifest matches the active embedding configuration.
    pub fn check_compatible(
        &self,
        model_name: &str,
        dimension: usize,
        provider: &str,
    ) -> Result<()> {
        if self.schema_version > MANIFEST_SCHEMA_VERSION {
            return Err(IndexError::SchemaMismatch(format!(
                "manifest version {} is newer than supported {}",
                self.schema_version, MANIFEST_SCHEMA_VERSION
            )));
        }
        if self.model_name != model_name {
            return Err(IndexError::SchemaMismatch(format!(
                "index was built with model '{}', configuration wants '{model_name}'",
                self.model_name
            )));
        }
        if self.dimension != dimension {
            return Err(IndexError::SchemaMismatch(format!(
                "index dimension {} does not match configured dimension {dimension}",
                self.dimension
            )));
        }
        if self.provider != provider {
            return Err(IndexError::SchemaMismatch(format!(
                "index was built with provider '{}', configuration wants '{provider}'",
                self.provider
            )));
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> IndexManifest {
        IndexManifest::new("text-embedding-3-small", 1536, "openai", 42, "abc123")
    }

    #[test]
    fn test_matching_config_accepted() {
        assert!(manifest()
            .check_compatible("text-embedding-3-small", 1536, "openai")
            .is_ok());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = manifest()
            .check_compatible("text-embedding-3-small", 1537, "openai")
            .unwrap_err();
        assert!(matches!(err, IndexError::SchemaMismatch(_)));
    }

    #[test]
    fn test_model_and_provider_mismatch_rejected() {
        assert!(manifest()
            .check_compatible("voyage-code-3", 1536, "openai")
            .is_err());
        assert!(manifest()
            .check_compatible("text-embedding-3-small", 1536, "voyageai")
            .is_err());
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let original = manifest();
        original.save(&path).await.unwrap();
        let loaded = IndexManifest::load(&path).await.unwrap();
        assert_eq!(original, loaded);
    }
}
