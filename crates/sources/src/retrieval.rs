//! Keyword retrieval: the terminal, lower-confidence fallback.
//!
//! Where the Store demands an exact match on every requested facet, this
//! source relaxes the query and scores each catalog record by how much of it
//! the record satisfies.
//!
//! ## Scoring
//! - +2 for each requested facet (age, genre, language, year category) the
//!   record matches exactly
//! - +1 when the requested age is within one year of the record's age
//! - +1 when the requested genre appears in the title or description
//!
//! Records with a zero score are discarded. Ties fall back to popularity and
//! then title, so output is deterministic.

use crate::error::SourceError;
use crate::traits::Retrieval;
use async_trait::async_trait;
use data_loader::{language_code, BookRecord, CatalogIndex, QueryFilters, SourceTag};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument};

/// [`Retrieval`] over the shared catalog
pub struct KeywordRetriever {
    index: Arc<CatalogIndex>,
    max_candidates: usize,
}

impl KeywordRetriever {
    pub fn new(index: Arc<CatalogIndex>) -> Self {
        Self {
            index,
            max_candidates: 20,
        }
    }

    /// Configure the number of candidates returned (default: 20)
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

#[async_trait]
impl Retrieval for KeywordRetriever {
    #[instrument(skip(self, filters), fields(max_candidates = self.max_candidates))]
    async fn retrieve(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError> {
        let index = self.index.clone();
        let filters = filters.clone();
        let limit = self.max_candidates;

        let candidates = tokio::task::spawn_blocking(move || score_candidates(index.all(), &filters, limit))
            .await
            .map_err(|e| SourceError::Unavailable(format!("retrieval task failed: {e}")))?;

        debug!("Retrieval produced {} candidates", candidates.len());
        Ok(candidates)
    }
}

/// Score, keep and order candidates, retagging them as retrieval output.
///
/// With no filters requested every record qualifies and order falls back to
/// popularity.
pub fn score_candidates(records: Vec<BookRecord>, filters: &QueryFilters, limit: usize) -> Vec<BookRecord> {
    let unconstrained = filters.is_unconstrained();

    let mut scored: Vec<(u32, String, BookRecord)> = records
        .into_par_iter()
        .filter_map(|mut record| {
            let score = relevance(&record, filters);
            if score == 0 && !unconstrained {
                return None;
            }
            record.source = SourceTag::Retrieval;
            Some((score, record.normalized_title(), record))
        })
        .collect();

    scored.par_sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.2.popularity.cmp(&a.2.popularity))
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.id.cmp(&b.2.id))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(_, _, record)| record).collect()
}

fn relevance(record: &BookRecord, filters: &QueryFilters) -> u32 {
    let mut score = 0;

    if let (Some(wanted), Some(actual)) = (filters.age_group(), record.age_group) {
        if wanted == actual {
            score += 2;
        } else if wanted.abs_diff(actual) <= 1 {
            score += 1;
        }
    }

    if let Some(genre) = filters.genre() {
        if record.genre.as_deref().map(|g| g.trim().to_lowercase()).as_deref() == Some(genre) {
            score += 2;
        }
        let in_text = record.title.to_lowercase().contains(genre)
            || record
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(genre));
        if in_text {
            score += 1;
        }
    }

    if let Some(language) = filters.language() {
        if record.language.as_deref().map(language_code).as_deref() == Some(language) {
            score += 2;
        }
    }

    if let Some(category) = filters.year_category() {
        if record.year_category == Some(category) {
            score += 2;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::FilterVocabulary;

    fn book(id: &str, title: &str, genre: &str, age: u8, popularity: u64) -> BookRecord {
        let mut record = BookRecord::new(id, title, SourceTag::Store);
        record.genre = Some(genre.to_string());
        record.language = Some("English".to_string());
        record.age_group = Some(age);
        record.popularity = popularity;
        record
    }

    fn build_test_index() -> Arc<CatalogIndex> {
        Arc::new(CatalogIndex::from_records([
            book("1", "Dragon Rider", "fantasy", 9, 3),
            book("2", "The Fantasy Atlas", "reference", 10, 1),
            book("3", "Counting Sheep", "picture book", 3, 50),
            book("4", "Wings of Fire", "fantasy", 10, 7),
        ]))
    }

    fn filters(pairs: &[(&str, &str)]) -> QueryFilters {
        QueryFilters::from_pairs(pairs.iter().copied(), &FilterVocabulary::default()).unwrap()
    }

    #[test]
    fn test_partial_matches_are_ranked_by_score() {
        let records = build_test_index().all();
        let results = score_candidates(records, &filters(&[("genre", "fantasy"), ("age", "9")]), 10);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        // 1: genre + age; 4: genre + near age; 2: title mention + near age
        assert_eq!(ids, vec!["1", "4", "2"]);
        assert!(results.iter().all(|r| r.source == SourceTag::Retrieval));
    }

    #[test]
    fn test_unconstrained_falls_back_to_popularity() {
        let results = score_candidates(build_test_index().all(), &QueryFilters::unconstrained(), 2);
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);
    }

    #[test]
    fn test_no_overlap_yields_nothing() {
        let results = score_candidates(build_test_index().all(), &filters(&[("genre", "horror")]), 10);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_respects_limit() {
        let retriever = KeywordRetriever::new(build_test_index()).with_max_candidates(1);
        let results = retriever.retrieve(&filters(&[("language", "en")])).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "3", "equal scores fall back to popularity");
    }
}
