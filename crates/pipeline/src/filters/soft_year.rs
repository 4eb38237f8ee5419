//! Soft year-category check.

use crate::traits::Filter;
use anyhow::Result;
use data_loader::{BookRecord, QueryFilters};

/// Flags records whose known year category differs from the requested one.
///
/// Never drops a record; the flag is shown to the caller instead.
pub struct SoftYearCategoryFilter;

impl Filter for SoftYearCategoryFilter {
    fn name(&self) -> &str {
        "SoftYearCategoryFilter"
    }

    fn apply(&self, mut records: Vec<BookRecord>, filters: &QueryFilters) -> Result<Vec<BookRecord>> {
        if let Some(wanted) = filters.year_category() {
            for record in &mut records {
                record.soft_year_mismatch = record.year_category.is_some_and(|c| c != wanted);
            }
        }
        Ok(records)
    }
}
