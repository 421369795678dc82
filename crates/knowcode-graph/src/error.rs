use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Schema mismatch: document version {found} is newer than supported version {supported}")]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("Containment violation: {0}")]
    ContainmentViolation(String),

    #[error("Coverage report error: {0}")]
    CoverageError(String),

    #[error("{0}")]
    Other(String),
}
