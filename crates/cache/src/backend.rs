//! The key-value contract every cache backend honours.

use crate::error::CacheError;
use async_trait::async_trait;
use std::time::Duration;

/// Opaque-blob key-value store with per-entry TTL.
///
/// Values are whole blobs: there is no field-level update. An entry read
/// after its TTL has elapsed is absent.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short label used in logs (e.g. `"local"`, `"redis"`)
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Liveness check. Backends that cannot fail keep the default.
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
