use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Graph error: {0}")]
    GraphError(#[from] knowcode_graph::GraphError),

    #[error("Parser error: {0}")]
    ParserError(#[from] knowcode_parsers::ParserError),

    #[error("Index error: {0}")]
    IndexError(#[from] knowcode_index::IndexError),

    #[error("Search error: {0}")]
    SearchError(#[from] knowcode_search::SearchError),

    #[error("Watcher error: {0}")]
    WatcherError(String),

    #[error("{0}")]
    Other(String),
}
