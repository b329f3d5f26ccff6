//! Error types for the cache and the indexing pass.

use perpdex_chain::ChainError;

/// Key/value store failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The store could not be reached or rejected the command.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A stored value could not be (de)serialized.
    #[error("cache codec error: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Failure of a scan pass or of a single window fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
