//! # Sources Crate
//!
//! Backing sources for book recommendations and the quota that gates the
//! external one.
//!
//! ## Components
//!
//! ### Capability traits
//! [`Store`], [`LiveFetch`] and [`Retrieval`]. The orchestrator only sees
//! these, so tests can swap in fakes.
//!
//! ### Adapters
//! - [`CatalogStore`]: exact-match queries over the in-memory catalog
//! - [`SqliteStore`]: the same contract over a SQLite file, so popularity
//!   and refreshed records persist across restarts
//! - [`GoogleBooksFetcher`]: the Google Books volumes API
//! - [`KeywordRetriever`]: relaxed facet scoring over the catalog, used as
//!   the lower-confidence terminal fallback
//!
//! ### Quota
//! [`QuotaTracker`] counts live-fetch calls per calendar day and persists
//! the count to a small JSON file.
//!
//! ## Example Usage
//!
//! ```ignore
//! use sources::{CatalogStore, KeywordRetriever, QuotaTracker, Store};
//! use data_loader::{CatalogIndex, QueryFilters};
//! use std::sync::Arc;
//!
//! let index = Arc::new(CatalogIndex::load_from_file("data/books_dataset.json".as_ref())?);
//! let store = CatalogStore::new(index.clone());
//! let retriever = KeywordRetriever::new(index).with_max_candidates(20);
//! let quota = QuotaTracker::with_usage_file(600, "data/api_usage.json");
//!
//! let books = store.query(&QueryFilters::unconstrained()).await?;
//! ```

pub mod error;
pub mod live_fetch;
pub mod quota;
pub mod retrieval;
pub mod sqlite_store;
pub mod store;
pub mod traits;

// Re-export commonly used types
pub use error::SourceError;
pub use live_fetch::GoogleBooksFetcher;
pub use quota::{Clock, QuotaExhausted, QuotaState, QuotaTracker, SystemClock};
pub use retrieval::KeywordRetriever;
pub use sqlite_store::SqliteStore;
pub use store::CatalogStore;
pub use traits::{LiveFetch, Retrieval, Store, UpsertCounts};
