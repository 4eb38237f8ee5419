//! Filter to drop records whose genre contradicts the request.

use crate::traits::Filter;
use anyhow::Result;
use data_loader::{BookRecord, QueryFilters};

/// Drops records with a known genre different from the requested one.
///
/// Records with no genre are kept: sources such as the live API do not
/// report genres in the catalog's vocabulary.
pub struct GenreMatchFilter;

impl Filter for GenreMatchFilter {
    fn name(&self) -> &str {
        "GenreMatchFilter"
    }

    fn apply(&self, records: Vec<BookRecord>, filters: &QueryFilters) -> Result<Vec<BookRecord>> {
        let Some(wanted) = filters.genre() else {
            return Ok(records);
        };

        Ok(records
            .into_iter()
            .filter(|record| match record.genre.as_deref() {
                Some(genre) => genre.trim().eq_ignore_ascii_case(wanted),
                None => true,
            })
            .collect())
    }
}
