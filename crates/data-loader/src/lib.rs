//! # Data Loader Crate
//!
//! Domain types and the book catalogue for the recommendation engine.
//!
//! ## Main Components
//!
//! - **types**: [`BookRecord`], [`SourceTag`], [`YearCategory`]
//! - **filters**: [`QueryFilters`] and boundary validation
//! - **parser**: Parse the JSON book dataset into records
//! - **index**: [`CatalogIndex`], the in-memory authoritative store
//! - **error**: Error types for loading and validation
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{CatalogIndex, FilterVocabulary, QueryFilters};
//! use std::path::Path;
//!
//! let index = CatalogIndex::load_from_file(Path::new("data/books_dataset.json"))?;
//! let filters = QueryFilters::from_pairs([("genre", "fiction"), ("age", "9")], &FilterVocabulary::default())?;
//! let books = index.query(&filters);
//! ```

pub mod error;
pub mod filters;
pub mod index;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{DataLoadError, Result, ValidationError};
pub use filters::{FilterKey, FilterVocabulary, QueryFilters};
pub use index::{CatalogFacets, CatalogIndex};
pub use types::{language_code, normalize_title, BookId, BookRecord, SourceTag, YearCategory};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_index_creation() {
        let index = CatalogIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_empty_queries() {
        let index = CatalogIndex::new();

        assert!(index.get("missing").is_none());
        assert!(index.query(&QueryFilters::unconstrained()).is_empty());
        assert_eq!(index.facets(), CatalogFacets::default());
    }
}
