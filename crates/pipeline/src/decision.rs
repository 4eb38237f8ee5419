//! Decision Rules: which sources to try, and in what order.
//!
//! Priority is fixed: **Cache → Store → LiveFetch → Retrieval**. The rules
//! are a pure function of the cache probe and the quota remaining, so the
//! orchestrator only has to walk the returned plan in order.
//!
//! - A cache hit short-circuits everything: the plan is just the cache.
//! - On a miss the cache step is already done (the probe was the attempt),
//!   and the plan lists Store, LiveFetch and Retrieval.
//! - LiveFetch is planned as skipped when no quota remains.
//! - Retrieval is always the terminal step.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// A source that can satisfy a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cache,
    Store,
    LiveFetch,
    Retrieval,
}

impl SourceKind {
    /// Fixed attempt order
    pub const PRIORITY: [SourceKind; 4] = [
        SourceKind::Cache,
        SourceKind::Store,
        SourceKind::LiveFetch,
        SourceKind::Retrieval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cache => "cache",
            SourceKind::Store => "store",
            SourceKind::LiveFetch => "live_fetch",
            SourceKind::Retrieval => "retrieval",
        }
    }

    /// The fallback whose hard failure fails the whole request
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceKind::Retrieval)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of looking the fingerprint up in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProbe {
    /// A non-expired entry exists
    Hit,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Attempt,
    SkipQuotaExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    pub source: SourceKind,
    pub action: StepAction,
}

impl PlannedStep {
    pub fn attempt(source: SourceKind) -> Self {
        Self {
            source,
            action: StepAction::Attempt,
        }
    }

    pub fn skip_by_quota(source: SourceKind) -> Self {
        Self {
            source,
            action: StepAction::SkipQuotaExhausted,
        }
    }
}

/// Ordered plan of source steps for one request.
pub fn decide(fingerprint: &Fingerprint, cache: CacheProbe, quota_remaining: u32) -> Vec<PlannedStep> {
    let plan = match cache {
        CacheProbe::Hit => vec![PlannedStep::attempt(SourceKind::Cache)],
        CacheProbe::Miss => {
            let live_fetch = if quota_remaining > 0 {
                PlannedStep::attempt(SourceKind::LiveFetch)
            } else {
                PlannedStep::skip_by_quota(SourceKind::LiveFetch)
            };
            vec![
                PlannedStep::attempt(SourceKind::Store),
                live_fetch,
                PlannedStep::attempt(SourceKind::Retrieval),
            ]
        }
    };

    debug!(
        fingerprint = fingerprint.short(),
        "Planned {:?} with quota remaining {}",
        plan.iter().map(|s| s.source.as_str()).collect::<Vec<_>>(),
        quota_remaining
    );
    plan
}
