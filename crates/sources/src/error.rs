use std::time::Duration;
use thiserror::Error;

/// Failures raised by a backing source.
///
/// The orchestrator treats every variant the same way: record it, then fall
/// through to the next source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Source timed out after {0:?}")]
    Timeout(Duration),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown record: {0}")]
    UnknownRecord(String),

    #[error("HTTP {status} from {endpoint}")]
    Http { status: u16, endpoint: String },

    #[error("Could not decode response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for SourceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => SourceError::Unavailable(e.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => SourceError::Decode(e.to_string()),
            other => SourceError::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Fetch(format!("request timed out: {e}"))
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Fetch(e.to_string())
        }
    }
}
