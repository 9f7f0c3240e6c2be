use thiserror::Error;

/// Top-level error type for the Recall retrieval engine.
///
/// Each variant names the stage that failed. Subsystem crates define their
/// own error types and implement `From<SubsystemError> for RecallError` so
/// that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecallError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Lexical analysis error: {0}")]
    Lexical(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for RecallError {
    fn from(err: toml::de::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RecallError {
    fn from(err: toml::ser::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        RecallError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Recall operations.
pub type Result<T> = std::result::Result<T, RecallError>;
