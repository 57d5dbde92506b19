//! Error types for regcache.

use thiserror::Error;

/// Errors produced by the query cache and the pipeline invoker.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing store could not be read or holds a corrupt record.
    ///
    /// Lookups never surface this; they degrade to a miss.
    #[error("Cache read failed: {0}")]
    StorageRead(String),

    /// A record could not be persisted. The computed payload is still valid.
    #[error("Cache write failed: {0}")]
    StorageWrite(String),

    /// Query parameters cannot be turned into a cache key.
    #[error("Invalid query parameters: {0}")]
    KeyNormalization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The external pipeline failed to produce a result.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns `true` for errors that only degrade caching and must not fail
    /// the request that produced the payload.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::StorageRead(_) | Self::StorageWrite(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
