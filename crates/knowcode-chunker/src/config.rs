use serde::{Deserialize, Serialize};

/// Configuration for chunk generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Classes whose source exceeds this many bytes are split so each
    /// method becomes its own chunk and the class header stays separate.
    pub max_entity_bytes: usize,

    /// Prefix each chunk with a comment block naming file, entity, and kind.
    /// Improves lexical recall for path- and symbol-shaped queries.
    pub embed_metadata: bool,

    /// Include docstrings in entity chunk text.
    pub include_docstrings: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_entity_bytes: 4096,
            embed_metadata: true,
            include_docstrings: true,
        }
    }
}

impl ChunkerConfig {
    /// Smaller chunks tuned for embedding models with short context.
    pub fn for_embeddings() -> Self {
        Self {
            max_entity_bytes: 2048,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entity_bytes == 0 {
            return Err("max_entity_bytes must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(ChunkerConfig::for_embeddings().validate().is_ok());
    }

    #[test]
    fn test_zero_bound_rejected() {
        let config = ChunkerConfig {
            max_entity_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
