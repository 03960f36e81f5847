use thiserror::Error;

/// Errors produced inside the cache.
///
/// Only construction and configuration errors ever reach a caller of [`StudyCache`](crate::StudyCache). Everything
/// else is recovered locally: corrupt records are deleted, failed writes are logged and dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("malformed cache record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed cache timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("storage I/O failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build cache: {0}")]
    Build(String),

    #[error("{0} is closed")]
    Closed(&'static str),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
