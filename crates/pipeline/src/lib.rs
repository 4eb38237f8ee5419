//! Decision and ranking logic for book recommendations.
//!
//! This crate provides:
//! - The Fingerprint Generator ([`fingerprint()`])
//! - Decision Rules mapping cache and quota state to a source plan ([`decide`])
//! - Merge & Rank over candidate lists from several sources ([`merge_and_rank`])
//! - The Filter trait and FilterPipeline deciding which rows qualify
//!
//! Everything here is synchronous and free of I/O; the orchestrator in the
//! `server` crate drives it.
//!
//! ## Example Usage
//! ```ignore
//! use pipeline::{decide, fingerprint, merge_and_rank, CacheProbe, FilterPipeline};
//!
//! let fp = fingerprint(&filters);
//! let plan = decide(&fp, CacheProbe::Miss, quota.remaining());
//!
//! let qualifying = FilterPipeline::standard().apply(store_rows, &filters)?;
//! let ranked = merge_and_rank(vec![qualifying]);
//! ```

pub mod decision;
pub mod filter_pipeline;
pub mod filters;
pub mod fingerprint;
pub mod merge;
pub mod traits;

// Re-export main types
pub use decision::{decide, CacheProbe, PlannedStep, SourceKind, StepAction};
pub use filter_pipeline::FilterPipeline;
pub use fingerprint::{fingerprint, Fingerprint};
pub use merge::{merge_and_rank, merge_and_rank_top, store_sourced_ids};
pub use traits::Filter;
