//! Capability interfaces for the three backing sources.
//!
//! Each adapter normalizes its native record shape into [`BookRecord`] and
//! stamps the matching [`data_loader::SourceTag`].

use crate::error::SourceError;
use async_trait::async_trait;
use data_loader::{BookRecord, QueryFilters};

/// Authoritative persisted records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Exact-match lookup on the provided filters only
    async fn query(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError>;

    /// Best-effort access counter bump
    async fn update_popularity(&self, id: &str, delta: u64) -> Result<(), SourceError>;

    /// Insert new records and refresh existing ones by id, keeping their
    /// popularity. Read-only stores keep the default, which refuses.
    async fn upsert(&self, records: &[BookRecord]) -> Result<UpsertCounts, SourceError> {
        let _ = records;
        Err(SourceError::Unavailable("store does not accept writes".to_string()))
    }
}

/// Outcome of a [`Store::upsert`] batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// External API. Every call must be gated through the quota tracker first.
#[async_trait]
pub trait LiveFetch: Send + Sync {
    async fn fetch(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError>;
}

/// Terminal fallback producing lower-confidence candidates.
#[async_trait]
pub trait Retrieval: Send + Sync {
    async fn retrieve(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError>;
}
