//! Error types for the retrieval core.

use thiserror::Error;

/// Errors surfaced by encoding, index building, and search.
///
/// Nothing in the retrieval path retries; every variant reaches the
/// immediate caller unchanged.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The encoder could not produce embeddings (model unavailable, runtime
    /// failure, or a vector of the wrong dimension).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Unrecognized search view or difficulty value.
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// The query was empty or whitespace only.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Persisted index, embeddings, or metadata disagree with each other.
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Cache artifacts could not be written.
    #[error("Failed to persist cache: {0}")]
    Persistence(String),

    /// An explain/run delegation failed or timed out.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// No endpoint is configured for the requested delegation.
    #[error("Upstream '{0}' is not configured")]
    UpstreamNotConfigured(&'static str),

    /// A corpus line could not be parsed.
    #[error("Corpus error at line {line}: {message}")]
    Corpus { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for RetrievalError {
    fn from(err: bincode::Error) -> Self {
        RetrievalError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RetrievalError {
    fn from(err: serde_json::Error) -> Self {
        RetrievalError::Serialization(err.to_string())
    }
}

/// Convenience result type for the retrieval core.
pub type Result<T> = std::result::Result<T, RetrievalError>;
