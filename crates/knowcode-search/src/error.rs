use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Index error: {0}")]
    IndexError(#[from] knowcode_index::IndexError),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("{0}")]
    Other(String),
}
