//! Fill gaps in a record from the request that produced it.

use crate::traits::Filter;
use anyhow::Result;
use data_loader::{BookRecord, QueryFilters};

/// Copies the requested genre and language onto records that lack them.
///
/// Only missing fields are filled; a known value is never overwritten.
pub struct EnrichmentFilter;

impl Filter for EnrichmentFilter {
    fn name(&self) -> &str {
        "EnrichmentFilter"
    }

    fn apply(&self, mut records: Vec<BookRecord>, filters: &QueryFilters) -> Result<Vec<BookRecord>> {
        for record in &mut records {
            if record.genre.is_none() {
                record.genre = filters.genre().map(str::to_string);
            }
            if record.language.is_none() {
                record.language = filters.language().map(str::to_string);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::{FilterVocabulary, SourceTag};

    #[test]
    fn test_enrichment_fills_only_missing_fields() {
        let bare = BookRecord::new("1", "Bare", SourceTag::LiveFetch);
        let mut known = BookRecord::new("2", "Known", SourceTag::LiveFetch);
        known.language = Some("ta".to_string());

        let filters = QueryFilters::from_pairs(
            [("genre", "adventure"), ("language", "english")],
            &FilterVocabulary::default(),
        )
        .unwrap();
        let enriched = EnrichmentFilter.apply(vec![bare, known], &filters).unwrap();

        assert_eq!(enriched[0].genre.as_deref(), Some("adventure"));
        assert_eq!(enriched[0].language.as_deref(), Some("en"));
        assert_eq!(enriched[1].language.as_deref(), Some("ta"));
    }
}
