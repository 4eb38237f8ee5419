//! Core traits for the post-filter pipeline.
//!
//! A filter decides which of a source's rows "qualify" for the request, and
//! may annotate or enrich them on the way through.

use anyhow::Result;
use data_loader::{BookRecord, QueryFilters};

/// Core trait for filtering a source's records.
///
/// ## Design Note
/// - `Send + Sync` so one pipeline can be shared by concurrent requests
/// - Filters take ownership of the Vec and return the kept records, so
///   annotating filters can mutate in place without cloning
pub trait Filter: Send + Sync {
    /// Returns the name of this filter (for logging/debugging)
    fn name(&self) -> &str;

    /// Apply this filter to a set of records.
    ///
    /// # Arguments
    /// * `records` - The records to filter (takes ownership)
    /// * `filters` - The normalized request filters
    fn apply(&self, records: Vec<BookRecord>, filters: &QueryFilters) -> Result<Vec<BookRecord>>;
}
