//! Store adapter over the in-memory catalog.

use crate::error::SourceError;
use crate::traits::{Store, UpsertCounts};
use async_trait::async_trait;
use data_loader::{BookRecord, CatalogIndex, QueryFilters, SourceTag};
use std::sync::Arc;
use tracing::{debug, instrument};

/// [`Store`] backed by a shared [`CatalogIndex`]
#[derive(Clone)]
pub struct CatalogStore {
    index: Arc<CatalogIndex>,
}

impl CatalogStore {
    pub fn new(index: Arc<CatalogIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<CatalogIndex> {
        &self.index
    }
}

#[async_trait]
impl Store for CatalogStore {
    #[instrument(skip(self, filters))]
    async fn query(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError> {
        let records = self.index.query(filters);
        debug!("Store matched {} records", records.len());
        Ok(records)
    }

    async fn update_popularity(&self, id: &str, delta: u64) -> Result<(), SourceError> {
        self.index
            .update_popularity(id, delta)
            .map(|_| ())
            .ok_or_else(|| SourceError::UnknownRecord(id.to_string()))
    }

    async fn upsert(&self, records: &[BookRecord]) -> Result<UpsertCounts, SourceError> {
        let mut counts = UpsertCounts::default();
        for record in records {
            let mut record = record.clone();
            record.source = SourceTag::Store;
            if self.index.upsert(record) {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::FilterVocabulary;

    fn build_test_store() -> CatalogStore {
        let mut gruffalo = BookRecord::new("isbn-1", "The Gruffalo", SourceTag::Store);
        gruffalo.genre = Some("picture book".to_string());
        gruffalo.popularity = 4;
        let mut matilda = BookRecord::new("isbn-2", "Matilda", SourceTag::Store);
        matilda.genre = Some("fiction".to_string());

        CatalogStore::new(Arc::new(CatalogIndex::from_records([gruffalo, matilda])))
    }

    #[tokio::test]
    async fn test_query_is_exact_match() {
        let store = build_test_store();
        let filters =
            QueryFilters::from_pairs([("genre", "fiction")], &FilterVocabulary::default()).unwrap();

        let records = store.query(&filters).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Matilda");
        assert_eq!(records[0].source, SourceTag::Store);
    }

    #[tokio::test]
    async fn test_update_popularity() {
        let store = build_test_store();
        store.update_popularity("isbn-1", 1).await.unwrap();
        assert_eq!(store.index().get("isbn-1").unwrap().popularity, 5);

        let err = store.update_popularity("missing", 1).await.unwrap_err();
        assert!(matches!(err, SourceError::UnknownRecord(_)));
    }

    #[tokio::test]
    async fn test_upsert_adds_and_refreshes() {
        let store = build_test_store();
        let mut refreshed = BookRecord::new("isbn-1", "The Gruffalo (Anniversary Edition)", SourceTag::LiveFetch);
        refreshed.genre = Some("picture book".to_string());
        let fresh = BookRecord::new("isbn-9", "Room on the Broom", SourceTag::LiveFetch);

        let counts = store.upsert(&[refreshed, fresh]).await.unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 1, updated: 1 });

        let stored = store.index().get("isbn-1").unwrap();
        assert_eq!(stored.title, "The Gruffalo (Anniversary Edition)");
        assert_eq!(stored.popularity, 4, "popularity survives a refresh");
        assert_eq!(store.index().get("isbn-9").unwrap().source, SourceTag::Store);
    }
}
