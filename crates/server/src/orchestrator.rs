//! # Recommendation Orchestrator
//!
//! Request-scoped state machine that composes the engine:
//!
//! ```text
//! START → FINGERPRINTING → SOURCE_ATTEMPT(n) → MERGING → TRACE_FINALIZED → DONE
//!                                   ↘ FAILED (terminal source failed, nothing answered)
//! ```
//!
//! 1. Fingerprint the normalized filters
//! 2. Probe the cache (attempt 0) and ask the decision rules for a plan
//! 3. Walk the plan, stopping at the first source with qualifying rows.
//!    Source errors and timeouts are recorded and fall through
//! 4. Merge and rank, promote to cache, bump Store popularity
//! 5. Finalize the trace and hand it to the sink exactly once
//!
//! Every source call runs in its own task bounded by a timeout. If the
//! caller drops the request future, the task is left to finish or time out
//! on its own and its result is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use cache::CacheGateway;
use data_loader::{BookRecord, FilterVocabulary, QueryFilters};
use pipeline::{
    decide, fingerprint, merge_and_rank, merge_and_rank_top, store_sourced_ids, CacheProbe, FilterPipeline, Fingerprint,
    SourceKind, StepAction,
};
use sources::{LiveFetch, QuotaTracker, Retrieval, SourceError, Store};

use crate::error::OrchestratorError;
use crate::trace::{AttemptOutcome, DecisionTrace, PipelineState, RunStatus, TraceRecorder, TraceSink, TracingSink};

/// Key prefix for per-record cache entries
pub const BOOK_KEY_PREFIX: &str = "book:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Results,
    /// Every source answered without error but nothing qualified
    NoResultsFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    /// Served by the retrieval fallback, directly or through the cache
    Low,
}

/// Final payload returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub correlation_id: String,
    pub fingerprint: Fingerprint,
    pub books: Vec<BookRecord>,
    pub outcome: Outcome,
    pub confidence: Confidence,
    pub served_from: Option<SourceKind>,
    pub trace: DecisionTrace,
}

/// Cache payload stored under [`Fingerprint::cache_key`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub books: Vec<BookRecord>,
    /// Source that originally produced the books
    pub source: SourceKind,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub store_timeout: Duration,
    pub live_fetch_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub cache_ttl: Duration,
    /// Absent means retrieval results are never promoted
    pub retrieval_ttl: Option<Duration>,
    pub top_k: Option<usize>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            live_fetch_timeout: Duration::from_secs(10),
            retrieval_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(3600),
            retrieval_ttl: None,
            top_k: None,
        }
    }
}

/// Main orchestrator that coordinates the recommendation pipeline
#[derive(Clone)]
pub struct BookOrchestrator {
    cache: Arc<CacheGateway>,
    quota: Arc<QuotaTracker>,
    store: Arc<dyn Store>,
    live_fetch: Option<Arc<dyn LiveFetch>>,
    retrieval: Arc<dyn Retrieval>,
    filter_pipeline: Arc<FilterPipeline>,
    vocabulary: Arc<FilterVocabulary>,
    trace_sink: Arc<dyn TraceSink>,
    settings: OrchestratorSettings,
}

/// A source that produced qualifying rows
struct Served {
    source: SourceKind,
    /// Original producer when `source` is the cache
    origin: SourceKind,
    books: Vec<BookRecord>,
}

impl BookOrchestrator {
    /// Orchestrator with live fetch disabled, the standard filters and a
    /// tracing sink. Use the `with_*` builders to change any of these.
    pub fn new(
        cache: Arc<CacheGateway>,
        quota: Arc<QuotaTracker>,
        store: Arc<dyn Store>,
        retrieval: Arc<dyn Retrieval>,
    ) -> Self {
        Self {
            cache,
            quota,
            store,
            live_fetch: None,
            retrieval,
            filter_pipeline: Arc::new(FilterPipeline::standard()),
            vocabulary: Arc::new(FilterVocabulary::default()),
            trace_sink: Arc::new(TracingSink),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_live_fetch(mut self, live_fetch: Arc<dyn LiveFetch>) -> Self {
        self.live_fetch = Some(live_fetch);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: FilterVocabulary) -> Self {
        self.vocabulary = Arc::new(vocabulary);
        self
    }

    pub fn with_filter_pipeline(mut self, filter_pipeline: FilterPipeline) -> Self {
        self.filter_pipeline = Arc::new(filter_pipeline);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn vocabulary(&self) -> &FilterVocabulary {
        &self.vocabulary
    }

    /// Validate raw key/value pairs, then run the pipeline.
    ///
    /// Rejected input never starts the pipeline and emits no trace.
    pub async fn recommend_raw<I, K, V>(&self, pairs: I) -> Result<Recommendation, OrchestratorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let filters = QueryFilters::from_pairs(pairs, &self.vocabulary)?;
        self.recommend(&filters).await
    }

    /// Main entry point: recommendations for already-normalized filters
    pub async fn recommend(&self, filters: &QueryFilters) -> Result<Recommendation, OrchestratorError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.run(filters, correlation_id).await
    }

    #[instrument(name = "recommend", skip(self, filters), fields(fingerprint = tracing::field::Empty))]
    async fn run(&self, filters: &QueryFilters, correlation_id: String) -> Result<Recommendation, OrchestratorError> {
        let mut recorder = TraceRecorder::start(correlation_id.clone());

        recorder.enter(PipelineState::Fingerprinting);
        let fp = fingerprint(filters);
        tracing::Span::current().record("fingerprint", fp.short());
        recorder.set_fingerprint(fp.clone());

        // Attempt 0: the cache probe
        recorder.enter(PipelineState::SourceAttempt(0));
        let probe_started = Instant::now();
        let mut cached: Option<CachedResult> = self.cache.get_json(&fp.cache_key()).await;
        let probe = match &cached {
            Some(entry) => {
                recorder.record(
                    SourceKind::Cache,
                    AttemptOutcome::Hit,
                    probe_started.elapsed(),
                    format!("cached {} result from {}", entry.source, entry.cached_at.to_rfc3339()),
                    entry.books.len(),
                );
                if entry.source.is_terminal() {
                    recorder.mark_low_confidence();
                }
                CacheProbe::Hit
            }
            None => {
                recorder.record(
                    SourceKind::Cache,
                    AttemptOutcome::Miss,
                    probe_started.elapsed(),
                    "no live entry for fingerprint",
                    0,
                );
                CacheProbe::Miss
            }
        };

        let plan = decide(&fp, probe, self.quota.remaining());

        let mut served: Option<Served> = None;
        let mut answered_cleanly = false;

        for (n, step) in plan.iter().enumerate() {
            if let Some(hit) = &served {
                recorder.record(
                    step.source,
                    AttemptOutcome::NotAttempted,
                    Duration::ZERO,
                    format!("short-circuited by {}", hit.source),
                    0,
                );
                continue;
            }

            if step.source == SourceKind::Cache {
                // The probe already recorded this attempt
                if let Some(entry) = cached.take() {
                    served = Some(Served {
                        source: SourceKind::Cache,
                        origin: entry.source,
                        books: entry.books,
                    });
                }
                continue;
            }

            recorder.enter(PipelineState::SourceAttempt(n + 1));

            if step.action == StepAction::SkipQuotaExhausted {
                recorder.record(
                    step.source,
                    AttemptOutcome::SkippedByQuota,
                    Duration::ZERO,
                    format!("daily quota of {} calls exhausted", self.quota.daily_limit()),
                    0,
                );
                continue;
            }

            let started = Instant::now();
            let result = match step.source {
                SourceKind::Store => {
                    let store = self.store.clone();
                    let filters = filters.clone();
                    run_bounded(self.settings.store_timeout, async move { store.query(&filters).await }).await
                }
                SourceKind::LiveFetch => {
                    let Some(live_fetch) = self.live_fetch.clone() else {
                        recorder.record(
                            step.source,
                            AttemptOutcome::NotAttempted,
                            Duration::ZERO,
                            "live fetch disabled",
                            0,
                        );
                        continue;
                    };
                    // Gate every call; another request may have taken the last unit
                    if let Err(exhausted) = self.quota.consume() {
                        recorder.record(
                            step.source,
                            AttemptOutcome::SkippedByQuota,
                            started.elapsed(),
                            exhausted.to_string(),
                            0,
                        );
                        continue;
                    }
                    let filters = filters.clone();
                    run_bounded(self.settings.live_fetch_timeout, async move {
                        live_fetch.fetch(&filters).await
                    })
                    .await
                }
                SourceKind::Retrieval => {
                    let retrieval = self.retrieval.clone();
                    let filters = filters.clone();
                    run_bounded(self.settings.retrieval_timeout, async move {
                        retrieval.retrieve(&filters).await
                    })
                    .await
                }
                SourceKind::Cache => continue,
            };

            let qualified = result.map_err(|e| e.to_string()).and_then(|rows| {
                let fetched = rows.len();
                self.filter_pipeline
                    .apply(rows, filters)
                    .map(|rows| (fetched, rows))
                    .map_err(|e| format!("filter pipeline failed: {e:#}"))
            });

            match qualified {
                Ok((fetched, rows)) if rows.is_empty() => {
                    answered_cleanly = true;
                    recorder.record(
                        step.source,
                        AttemptOutcome::Miss,
                        started.elapsed(),
                        format!("no qualifying rows ({fetched} fetched)"),
                        0,
                    );
                }
                Ok((_, rows)) => {
                    answered_cleanly = true;
                    recorder.record(
                        step.source,
                        AttemptOutcome::Hit,
                        started.elapsed(),
                        format!("{} qualifying rows", rows.len()),
                        rows.len(),
                    );
                    if step.source.is_terminal() {
                        recorder.mark_low_confidence();
                    }
                    served = Some(Served {
                        source: step.source,
                        origin: step.source,
                        books: rows,
                    });
                }
                Err(reason) => {
                    warn!("{} failed for {}: {}", step.source, fp.short(), reason);
                    recorder.record(step.source, AttemptOutcome::Error, started.elapsed(), reason, 0);

                    if step.source.is_terminal() && !answered_cleanly {
                        return Err(self.fail(recorder));
                    }
                }
            }
        }

        recorder.enter(PipelineState::Merging);
        // The cache keeps the full ranked list; top_k only shapes the response
        let (books, served_from, origin) = match served {
            Some(hit) if hit.source == SourceKind::Cache => (
                merge_and_rank_top(vec![hit.books], self.settings.top_k),
                Some(hit.source),
                Some(hit.origin),
            ),
            Some(hit) => {
                let ranked = merge_and_rank(vec![hit.books]);
                self.promote(&fp, &ranked, hit.source).await;
                (
                    merge_and_rank_top(vec![ranked], self.settings.top_k),
                    Some(hit.source),
                    Some(hit.origin),
                )
            }
            None => (Vec::new(), None, None),
        };

        if served_from.is_some_and(|s| s != SourceKind::Cache) {
            self.bump_popularity(&books).await;
        }

        let outcome = if books.is_empty() {
            Outcome::NoResultsFound
        } else {
            Outcome::Results
        };
        let confidence = match origin {
            Some(source) if source.is_terminal() => Confidence::Low,
            _ => Confidence::High,
        };
        let status = match outcome {
            Outcome::Results => RunStatus::Results,
            Outcome::NoResultsFound => RunStatus::NoResults,
        };

        let trace = recorder.finalize(status, served_from, books.len());
        self.trace_sink.emit(&trace);

        info!(
            "Served {} books for {} from {} in {:.2}ms",
            books.len(),
            fp.short(),
            served_from.map(|s| s.as_str()).unwrap_or("nowhere"),
            trace.total_latency_ms
        );

        Ok(Recommendation {
            correlation_id,
            fingerprint: fp,
            books,
            outcome,
            confidence,
            served_from,
            trace,
        })
    }

    fn fail(&self, recorder: TraceRecorder) -> OrchestratorError {
        let correlation_id = recorder.correlation_id().to_string();
        let trace = recorder.finalize(RunStatus::Failed, None, 0);
        self.trace_sink.emit(&trace);
        error!("Every source failed; request {} aborted", correlation_id);
        OrchestratorError::PipelineFailure { correlation_id }
    }

    /// Write the ranked result back under the fingerprint.
    ///
    /// Retrieval output is only promoted when a retrieval TTL is configured.
    async fn promote(&self, fp: &Fingerprint, books: &[BookRecord], source: SourceKind) {
        let ttl = match source {
            SourceKind::Store | SourceKind::LiveFetch => self.settings.cache_ttl,
            SourceKind::Retrieval => match self.settings.retrieval_ttl {
                Some(ttl) => ttl,
                None => {
                    debug!("Not promoting retrieval result for {}", fp.short());
                    return;
                }
            },
            SourceKind::Cache => return,
        };

        let entry = CachedResult {
            books: books.to_vec(),
            source,
            cached_at: Utc::now(),
        };
        self.cache.set_json(&fp.cache_key(), &entry, ttl).await;
        debug!("Promoted {} books for {} with ttl {:?}", books.len(), fp.short(), ttl);
    }

    /// +1 access for each returned Store record; failures are logged only
    async fn bump_popularity(&self, books: &[BookRecord]) {
        for id in store_sourced_ids(books) {
            let store = self.store.clone();
            let owned = id.to_string();
            let result = run_bounded(self.settings.store_timeout, async move {
                store.update_popularity(&owned, 1).await
            })
            .await;
            if let Err(e) = result {
                warn!("Popularity update for {} failed: {}", id, e);
            }
        }
    }
}

/// Run a source call in its own task, bounded by `limit`.
///
/// Dropping the returned future does not cancel the task.
pub async fn run_bounded<T, F>(limit: Duration, call: F) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, SourceError>> + Send + 'static,
{
    let handle = tokio::spawn(async move { tokio::time::timeout(limit, call).await });
    match handle.await {
        Ok(Ok(result)) => result,
        Ok(Err(_elapsed)) => Err(SourceError::Timeout(limit)),
        Err(join_error) => Err(SourceError::Unavailable(format!("source task aborted: {join_error}"))),
    }
}
