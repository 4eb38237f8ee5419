//! Merge & Rank.
//!
//! ## Algorithm
//! 1. Flatten the candidate lists in source attempt order
//! 2. Drop every record whose normalized title (or identifier) was already
//!    seen. The first occurrence wins and keeps its source tag; a later
//!    duplicate is discarded whole, even if it carries a higher popularity
//! 3. Stable sort by popularity descending, then normalized title ascending
//! 4. Optionally keep only the first `top_k`
//!
//! Output depends only on the input, so repeated calls give identical order.

use data_loader::{BookRecord, SourceTag};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

pub fn merge_and_rank(candidate_lists: Vec<Vec<BookRecord>>) -> Vec<BookRecord> {
    merge_and_rank_top(candidate_lists, None)
}

pub fn merge_and_rank_top(candidate_lists: Vec<Vec<BookRecord>>, top_k: Option<usize>) -> Vec<BookRecord> {
    let flattened: Vec<BookRecord> = candidate_lists.into_iter().flatten().collect();
    let input_len = flattened.len();

    // Normalizing titles is the only per-record work; do it up front
    let keyed: Vec<(String, BookRecord)> = flattened
        .into_par_iter()
        .map(|record| (record.normalized_title(), record))
        .collect();

    let mut seen_titles = HashSet::new();
    let mut seen_ids = HashSet::new();
    let mut unique: Vec<(String, BookRecord)> = Vec::with_capacity(keyed.len());
    for (title, record) in keyed {
        if seen_titles.contains(&title) || seen_ids.contains(&record.id) {
            continue;
        }
        seen_titles.insert(title.clone());
        seen_ids.insert(record.id.clone());
        unique.push((title, record));
    }

    unique.sort_by(|(title_a, a), (title_b, b)| {
        b.popularity.cmp(&a.popularity).then_with(|| title_a.cmp(title_b))
    });

    let mut ranked: Vec<BookRecord> = unique.into_iter().map(|(_, record)| record).collect();
    if let Some(k) = top_k {
        ranked.truncate(k);
    }

    debug!("Merged {} candidates into {} ranked records", input_len, ranked.len());
    ranked
}

/// Identifiers of Store-sourced records, whose popularity is bumped on return
pub fn store_sourced_ids(records: &[BookRecord]) -> Vec<&str> {
    records
        .iter()
        .filter(|r| r.source == SourceTag::Store)
        .map(|r| r.id.as_str())
        .collect()
}
