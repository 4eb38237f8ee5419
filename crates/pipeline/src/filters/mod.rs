//! Filter implementations for the qualifying pipeline.
//!
//! This module contains the concrete filters that can be composed into a
//! FilterPipeline.

pub mod enrichment;
pub mod genre_match;
pub mod soft_year;

// Re-export for convenience
pub use enrichment::EnrichmentFilter;
pub use genre_match::GenreMatchFilter;
pub use soft_year::SoftYearCategoryFilter;
