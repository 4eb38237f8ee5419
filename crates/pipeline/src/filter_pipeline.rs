//! The FilterPipeline chains filters into one qualifying step.

use crate::filters::{EnrichmentFilter, GenreMatchFilter, SoftYearCategoryFilter};
use crate::traits::Filter;
use anyhow::Result;
use data_loader::{BookRecord, QueryFilters};
use tracing;

/// Chains multiple filters together into a processing pipeline.
///
/// ## Usage
/// ```ignore
/// let pipeline = FilterPipeline::new()
///     .add_filter(GenreMatchFilter)
///     .add_filter(SoftYearCategoryFilter)
///     .add_filter(EnrichmentFilter);
///
/// let qualifying = pipeline.apply(records, &filters)?;
/// ```
pub struct FilterPipeline {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterPipeline {
    /// Create a new empty FilterPipeline.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// The qualifying filters applied to every source's rows.
    ///
    /// Genre matching runs before enrichment so a filled-in genre can never
    /// rescue a record that was dropped.
    pub fn standard() -> Self {
        Self::new()
            .add_filter(GenreMatchFilter)
            .add_filter(SoftYearCategoryFilter)
            .add_filter(EnrichmentFilter)
    }

    /// Add a filter to the pipeline (builder pattern).
    pub fn add_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all filters in sequence.
    ///
    /// # Returns
    /// * `Ok(Vec<BookRecord>)` - The records left after all filters
    /// * `Err` - If any filter fails
    pub fn apply(&self, records: Vec<BookRecord>, filters: &QueryFilters) -> Result<Vec<BookRecord>> {
        let mut current = records;
        for filter in &self.filters {
            tracing::debug!(
                "Applying filter: {} (input count: {})",
                filter.name(),
                current.len()
            );
            current = filter.apply(current, filters)?;
            tracing::debug!(
                "Filter applied: {} (output count: {})",
                filter.name(),
                current.len()
            );
        }
        Ok(current)
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}
