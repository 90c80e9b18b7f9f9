use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Queue admission failed: {0}")]
    Admission(String),

    #[error("Payload decode failed: {0}")]
    Decode(String),

    #[error("Directory observer must be started inside a Tokio runtime")]
    NoRuntime,

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Errors that may clear up on their own (network hiccups, files still
    /// being written). Callers retry these at the next filesystem event.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Io(_) | IngestError::Timeout { .. } | IngestError::Store(_) => true,
            #[cfg(feature = "redis")]
            IngestError::Redis(err) => {
                err.is_io_error() || err.is_timeout() || err.is_connection_dropped()
            }
            _ => false,
        }
    }
}

impl From<notify::Error> for IngestError {
    fn from(err: notify::Error) -> Self {
        IngestError::Watch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Bound a store or filesystem future by `limit`.
pub(crate) async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout {
            operation,
            elapsed: limit,
        }),
    }
}
