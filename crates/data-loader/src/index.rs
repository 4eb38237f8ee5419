//! In-memory catalogue index.
//!
//! [`CatalogIndex`] is the authoritative record set behind the Store adapter.
//! It is shared behind an `Arc` by concurrent requests, so the data sits
//! behind a `RwLock`: queries take the read side, popularity updates the
//! write side.

use crate::error::Result;
use crate::filters::QueryFilters;
use crate::parser;
use crate::types::{BookId, BookRecord, YearCategory};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Catalog {
    /// Records in load order
    books: Vec<BookRecord>,
    /// Book id -> position in `books`
    positions: HashMap<BookId, usize>,
}

/// Distinct values present in the catalogue, sorted, for building pickers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogFacets {
    pub genres: Vec<String>,
    pub languages: Vec<String>,
    pub age_groups: Vec<u8>,
    pub year_categories: Vec<YearCategory>,
}

/// Thread-safe in-memory book catalogue.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    inner: RwLock<Catalog>,
}

impl CatalogIndex {
    /// Creates a new, empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and index the JSON dataset at `path`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let books = parser::parse_books(path)?;
        let index = Self::from_records(books);
        info!("Loaded {} books from {}", index.len(), path.display());
        Ok(index)
    }

    /// Build an index from already-normalized records.
    ///
    /// When two records share an id the first one wins.
    pub fn from_records(records: impl IntoIterator<Item = BookRecord>) -> Self {
        let index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a record. Returns `false` if the id is already present.
    pub fn insert(&self, record: BookRecord) -> bool {
        let mut catalog = self.write();
        if catalog.positions.contains_key(&record.id) {
            warn!("Duplicate book id {} ignored", record.id);
            return false;
        }
        let position = catalog.books.len();
        catalog.positions.insert(record.id.clone(), position);
        catalog.books.push(record);
        true
    }

    /// Insert a record, or refresh the stored one with the same id.
    ///
    /// A refresh keeps the stored popularity and any facet the incoming
    /// record leaves unknown. Returns `true` when the id was new.
    pub fn upsert(&self, record: BookRecord) -> bool {
        let mut catalog = self.write();
        let existing = catalog.positions.get(&record.id).copied();
        let Some(position) = existing else {
            let position = catalog.books.len();
            catalog.positions.insert(record.id.clone(), position);
            catalog.books.push(record);
            return true;
        };

        let stored = &mut catalog.books[position];
        stored.title = record.title;
        stored.authors = record.authors;
        stored.genre = record.genre.or(stored.genre.take());
        stored.language = record.language.or(stored.language.take());
        stored.age_group = record.age_group.or(stored.age_group);
        stored.year_category = record.year_category.or(stored.year_category);
        stored.description = record.description.or(stored.description.take());
        stored.thumbnail_url = record.thumbnail_url.or(stored.thumbnail_url.take());
        debug!("Refreshed book {}", stored.id);
        false
    }

    /// Get a book by id
    pub fn get(&self, id: &str) -> Option<BookRecord> {
        let catalog = self.read();
        catalog.positions.get(id).map(|&pos| catalog.books[pos].clone())
    }

    /// All records matching the provided filters exactly, in load order.
    pub fn query(&self, filters: &QueryFilters) -> Vec<BookRecord> {
        let catalog = self.read();
        let matched: Vec<BookRecord> = catalog
            .books
            .iter()
            .filter(|book| filters.matches(book))
            .cloned()
            .collect();
        debug!("Catalog query matched {} of {} books", matched.len(), catalog.books.len());
        matched
    }

    /// Add `delta` to a book's popularity counter.
    ///
    /// Returns the new value, or `None` if the id is unknown.
    pub fn update_popularity(&self, id: &str, delta: u64) -> Option<u64> {
        let mut catalog = self.write();
        let pos = *catalog.positions.get(id)?;
        let book = &mut catalog.books[pos];
        book.popularity = book.popularity.saturating_add(delta);
        Some(book.popularity)
    }

    /// Snapshot of every record, in load order
    pub fn all(&self) -> Vec<BookRecord> {
        self.read().books.clone()
    }

    pub fn len(&self) -> usize {
        self.read().books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deduplicated, sorted values for each filterable field
    pub fn facets(&self) -> CatalogFacets {
        let catalog = self.read();
        let mut genres = BTreeSet::new();
        let mut languages = BTreeSet::new();
        let mut ages = BTreeSet::new();
        let mut categories = BTreeSet::new();

        for book in &catalog.books {
            if let Some(genre) = &book.genre {
                genres.insert(genre.trim().to_string());
            }
            if let Some(language) = &book.language {
                languages.insert(language.trim().to_string());
            }
            if let Some(age) = book.age_group {
                ages.insert(age);
            }
            if let Some(category) = book.year_category {
                categories.insert(category);
            }
        }

        CatalogFacets {
            genres: genres.into_iter().collect(),
            languages: languages.into_iter().collect(),
            age_groups: ages.into_iter().collect(),
            year_categories: categories.into_iter().collect(),
        }
    }
}
