//! Errors raised by cache backends.
//!
//! The gateway never surfaces these to callers; they only trigger the
//! degrade-to-local path and show up in logs.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to a cache backend
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid cache url: {0}")]
    InvalidUrl(String),
}
