//! Wiring from [`Config`] to a ready [`BookOrchestrator`], plus the
//! maintenance jobs that run against the same handles (cache warm-up and
//! the live catalog refresh).

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use cache::CacheGateway;
use data_loader::{BookRecord, CatalogIndex, FilterVocabulary, QueryFilters, SourceTag};
use pipeline::FilterPipeline;
use sources::{CatalogStore, GoogleBooksFetcher, KeywordRetriever, LiveFetch, QuotaTracker, SqliteStore, Store};

use crate::config::Config;
use crate::orchestrator::{BookOrchestrator, OrchestratorSettings, BOOK_KEY_PREFIX};
use crate::trace::{FanoutSink, JsonLinesSink, TraceSink, TracingSink};

/// Shared handles behind one orchestrator
pub struct Engine {
    pub config: Config,
    /// In-memory view used by retrieval and facets
    pub catalog: Arc<CatalogIndex>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<CacheGateway>,
    pub quota: Arc<QuotaTracker>,
    pub orchestrator: BookOrchestrator,
    live_fetch: Option<Arc<dyn LiveFetch>>,
}

/// Summary of one [`Engine::refresh`] run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Live API calls made (each spent one quota unit)
    pub fetched_queries: usize,
    pub skipped_by_quota: usize,
    pub failed_queries: usize,
    pub inserted: usize,
    pub updated: usize,
    /// `book:<id>` entries rewritten
    pub cached: usize,
    /// Recommendation entries dropped so the next request sees the new rows
    pub invalidated: usize,
}

fn load_catalog(config: &Config) -> Result<CatalogIndex> {
    let start = Instant::now();
    let catalog = CatalogIndex::load_from_file(&config.catalog.path)
        .with_context(|| format!("Failed to load catalog {}", config.catalog.path.display()))?;
    info!("Loaded {} books in {:.2?}", catalog.len(), start.elapsed());
    Ok(catalog)
}

impl Engine {
    pub async fn from_config(config: Config) -> Result<Self> {
        let cache = Arc::new(CacheGateway::connect(config.cache.url.as_deref(), config.cache.connect_timeout()).await);

        let Some(path) = config.store.database_path.clone() else {
            let catalog = Arc::new(load_catalog(&config)?);
            return Self::assemble(config, catalog, cache);
        };

        let store = SqliteStore::open(&path)
            .await
            .with_context(|| format!("Failed to open book store {}", path.display()))?;
        if store.count().await? == 0 {
            let seed = load_catalog(&config)?.all();
            store.seed_if_empty(&seed).await.context("Failed to seed book store")?;
        }

        // Retrieval reads the database contents, including previously refreshed records
        let catalog = Arc::new(CatalogIndex::from_records(store.all().await?));
        info!("Book store {} holds {} books", path.display(), catalog.len());
        Self::assemble_with_store(config, catalog, cache, Arc::new(store))
    }

    /// Build from an already-loaded catalog and cache, serving the Store from the catalog itself
    pub fn assemble(config: Config, catalog: Arc<CatalogIndex>, cache: Arc<CacheGateway>) -> Result<Self> {
        let store = Arc::new(CatalogStore::new(catalog.clone()));
        Self::assemble_with_store(config, catalog, cache, store)
    }

    pub fn assemble_with_store(
        config: Config,
        catalog: Arc<CatalogIndex>,
        cache: Arc<CacheGateway>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        let quota = Arc::new(match &config.quota.usage_file {
            Some(path) => QuotaTracker::with_usage_file(config.quota.daily_limit, path.clone()),
            None => QuotaTracker::in_memory(config.quota.daily_limit),
        });

        let settings = OrchestratorSettings {
            store_timeout: Duration::from_millis(config.timeouts.store_ms),
            live_fetch_timeout: Duration::from_millis(config.timeouts.live_fetch_ms),
            retrieval_timeout: Duration::from_millis(config.timeouts.retrieval_ms),
            cache_ttl: config.cache.ttl(),
            retrieval_ttl: config.cache.retrieval_ttl(),
            top_k: config.ranking.top_k,
        };

        let retrieval =
            Arc::new(KeywordRetriever::new(catalog.clone()).with_max_candidates(config.retrieval.max_candidates));

        let mut sink = FanoutSink::new().with_sink(Arc::new(TracingSink));
        if let Some(path) = &config.trace.jsonl_path {
            let jsonl = JsonLinesSink::open(path)
                .with_context(|| format!("Failed to open trace log {}", path.display()))?;
            sink = sink.with_sink(Arc::new(jsonl));
        }
        let sink: Arc<dyn TraceSink> = Arc::new(sink);

        let mut orchestrator = BookOrchestrator::new(cache.clone(), quota.clone(), store.clone(), retrieval)
            .with_settings(settings)
            .with_vocabulary(FilterVocabulary::new(config.filters.genres.iter()))
            .with_filter_pipeline(FilterPipeline::standard())
            .with_trace_sink(sink);

        let mut live_fetch: Option<Arc<dyn LiveFetch>> = None;
        if config.live_fetch.enabled {
            let fetcher = GoogleBooksFetcher::new(
                config.live_fetch.endpoint.clone(),
                Duration::from_millis(config.timeouts.live_fetch_ms),
            )
            .context("Failed to build live fetch client")?
            .with_max_results(config.live_fetch.max_results)
            .with_api_key(config.live_fetch.api_key.clone());
            let fetcher: Arc<dyn LiveFetch> = Arc::new(fetcher);
            orchestrator = orchestrator.with_live_fetch(fetcher.clone());
            live_fetch = Some(fetcher);
        } else {
            info!("Live fetch disabled by configuration");
        }

        Ok(Self {
            config,
            catalog,
            store,
            cache,
            quota,
            orchestrator,
            live_fetch,
        })
    }

    /// Swap the live fetch adapter used by both requests and `refresh`
    pub fn with_live_fetch(mut self, live_fetch: Arc<dyn LiveFetch>) -> Self {
        self.orchestrator = self.orchestrator.with_live_fetch(live_fetch.clone());
        self.live_fetch = Some(live_fetch);
        self
    }

    /// One query per refresh genre, crossed with the refresh languages if any
    fn refresh_queries(&self) -> Result<Vec<QueryFilters>> {
        let vocabulary = FilterVocabulary::new(self.config.filters.genres.iter());
        let mut queries = Vec::new();
        for genre in self.config.refresh_genres() {
            if self.config.refresh.languages.is_empty() {
                queries.push(QueryFilters::from_pairs([("genre", genre.as_str())], &vocabulary)?);
            }
            for language in &self.config.refresh.languages {
                let pairs = [("genre", genre.as_str()), ("language", language.as_str())];
                queries.push(QueryFilters::from_pairs(pairs, &vocabulary)?);
            }
        }
        Ok(queries)
    }

    /// Pull fresh records from the live API into the Store.
    ///
    /// Every call is gated by the daily quota. Fetched rows are upserted
    /// (stored popularity is kept), their `book:<id>` cache entries are
    /// rewritten and the cached recommendation for each refreshed query is
    /// dropped. A failed or timed-out query is logged and skipped; a Store
    /// write failure aborts the run.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let Some(live_fetch) = &self.live_fetch else {
            anyhow::bail!("live fetch is disabled; nothing to refresh from");
        };
        let queries = self.refresh_queries().context("Invalid refresh query")?;
        if queries.is_empty() {
            anyhow::bail!("no refresh genres configured (set refresh.genres or filters.genres)");
        }

        let timeout = Duration::from_millis(self.config.timeouts.live_fetch_ms);
        let ttl = self.config.cache.ttl();
        let mut report = RefreshReport::default();

        for filters in &queries {
            let fp = pipeline::fingerprint(filters);
            if let Err(exhausted) = self.quota.consume() {
                warn!("Skipping refresh query {}: {}", fp.short(), exhausted);
                report.skipped_by_quota += 1;
                continue;
            }
            report.fetched_queries += 1;

            let rows = match tokio::time::timeout(timeout, live_fetch.fetch(filters)).await {
                Ok(Ok(rows)) => rows,
                Ok(Err(e)) => {
                    warn!("Refresh query {} failed: {}", fp.short(), e);
                    report.failed_queries += 1;
                    continue;
                }
                Err(_) => {
                    warn!("Refresh query {} timed out after {:?}", fp.short(), timeout);
                    report.failed_queries += 1;
                    continue;
                }
            };

            let rows: Vec<BookRecord> = rows.into_iter().map(|row| stamp_for_store(row, filters)).collect();
            let counts = self.store.upsert(&rows).await.context("Failed to write refreshed books")?;
            report.inserted += counts.inserted;
            report.updated += counts.updated;

            for row in rows {
                let id = row.id.clone();
                self.catalog.upsert(row);
                if let Some(merged) = self.catalog.get(&id) {
                    self.cache.set_json(&format!("{BOOK_KEY_PREFIX}{id}"), &merged, ttl).await;
                    report.cached += 1;
                }
            }
            self.cache.delete(&fp.cache_key()).await;
            report.invalidated += 1;
        }

        info!(
            "Refresh finished: {} queries, {} inserted, {} updated, {} skipped by quota",
            report.fetched_queries, report.inserted, report.updated, report.skipped_by_quota
        );
        Ok(report)
    }

    /// Write every catalog record into the cache under `book:<id>`.
    ///
    /// Returns the number of records written.
    pub async fn warm_cache(&self) -> usize {
        let ttl = self.config.cache.ttl();
        let books = self.catalog.all();
        for book in &books {
            self.cache.set_json(&format!("{BOOK_KEY_PREFIX}{}", book.id), book, ttl).await;
        }
        info!("Warmed cache with {} books on {}", books.len(), self.cache.active_backend());
        books.len()
    }
}

/// Live rows become Store rows; facets the API left unknown come from the query
fn stamp_for_store(mut row: BookRecord, filters: &QueryFilters) -> BookRecord {
    row.source = SourceTag::Store;
    if row.genre.is_none() {
        row.genre = filters.genre().map(str::to_string);
    }
    if row.language.is_none() {
        row.language = filters.language().map(str::to_string);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sources::SourceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ============================================================================
    // Fixtures
    // ============================================================================

    /// Live API stand-in: returns the same rows for every query except `failing_genre`
    #[derive(Default)]
    struct CannedLiveFetch {
        rows: Vec<BookRecord>,
        failing_genre: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LiveFetch for CannedLiveFetch {
        async fn fetch(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if filters.genre().is_some() && filters.genre() == self.failing_genre.as_deref() {
                return Err(SourceError::Unavailable("api down".to_string()));
            }
            Ok(self.rows.clone())
        }
    }

    fn live_rows() -> Vec<BookRecord> {
        vec![
            BookRecord::new("isbn-1", "The Gruffalo (Revised)", SourceTag::LiveFetch),
            BookRecord::new("isbn-9", "Zog", SourceTag::LiveFetch),
        ]
    }

    fn refresh_config(genres: &[&str], daily_limit: u32) -> Config {
        let mut config = offline_config();
        config.refresh.genres = genres.iter().map(|g| g.to_string()).collect();
        config.quota.daily_limit = daily_limit;
        config
    }

    fn picture_key() -> String {
        let filters = QueryFilters::from_pairs([("genre", "picture")], &FilterVocabulary::default()).unwrap();
        pipeline::fingerprint(&filters).cache_key()
    }

    fn catalog() -> Arc<CatalogIndex> {
        let mut a = BookRecord::new("isbn-1", "The Gruffalo", SourceTag::Store);
        a.genre = Some("picture".to_string());
        let b = BookRecord::new("isbn-2", "Holes", SourceTag::Store);
        Arc::new(CatalogIndex::from_records([a, b]))
    }

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.live_fetch.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_warm_cache_writes_every_record() {
        let engine = Engine::assemble(offline_config(), catalog(), Arc::new(CacheGateway::local_only())).unwrap();

        assert_eq!(engine.warm_cache().await, 2);
        let cached: Option<BookRecord> = engine.cache.get_json("book:isbn-1").await;
        assert_eq!(cached.unwrap().title, "The Gruffalo");
    }

    #[tokio::test]
    async fn test_assembled_engine_serves_from_store() {
        let engine = Engine::assemble(offline_config(), catalog(), Arc::new(CacheGateway::local_only())).unwrap();

        let rec = engine.orchestrator.recommend_raw([("genre", "picture")]).await.unwrap();
        assert_eq!(rec.books.len(), 1);
        assert_eq!(rec.books[0].id, "isbn-1");
        assert_eq!(engine.catalog.get("isbn-1").unwrap().popularity, 1, "store records are bumped");
    }

    #[tokio::test]
    async fn test_missing_catalog_is_an_error() {
        let mut config = offline_config();
        config.catalog.path = "does/not/exist.json".into();
        assert!(Engine::from_config(config).await.is_err());
    }

    #[test]
    fn test_trace_log_is_opened_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config();
        config.trace.jsonl_path = Some(dir.path().join("traces.jsonl"));

        Engine::assemble(config, catalog(), Arc::new(CacheGateway::local_only())).unwrap();
        assert!(dir.path().join("traces.jsonl").exists());
    }

    #[tokio::test]
    async fn test_refresh_upserts_rewarms_and_invalidates() {
        let live = Arc::new(CannedLiveFetch {
            rows: live_rows(),
            ..Default::default()
        });
        let engine = Engine::assemble(refresh_config(&["picture"], 10), catalog(), Arc::new(CacheGateway::local_only()))
            .unwrap()
            .with_live_fetch(live.clone());

        // Prime the cached recommendation and bump isbn-1 once
        engine.orchestrator.recommend_raw([("genre", "picture")]).await.unwrap();
        assert!(engine.cache.get(&picture_key()).await.is_some());

        let report = engine.refresh().await.unwrap();
        assert_eq!(report.fetched_queries, 1);
        assert_eq!((report.inserted, report.updated), (1, 1));
        assert_eq!(report.cached, 2);
        assert_eq!(report.invalidated, 1);
        assert_eq!(engine.quota.used_today(), 1, "refresh spends quota");

        let revised = engine.catalog.get("isbn-1").unwrap();
        assert_eq!(revised.title, "The Gruffalo (Revised)");
        assert_eq!(revised.popularity, 1, "refresh keeps popularity");
        let zog: BookRecord = engine.cache.get_json("book:isbn-9").await.unwrap();
        assert_eq!(zog.genre.as_deref(), Some("picture"), "genre taken from the refresh query");
        assert_eq!(zog.source, SourceTag::Store);
        assert!(engine.cache.get(&picture_key()).await.is_none(), "stale recommendation dropped");

        let rec = engine.orchestrator.recommend_raw([("genre", "picture")]).await.unwrap();
        assert_eq!(rec.books.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_is_gated_by_quota_and_skips_failures() {
        let live = Arc::new(CannedLiveFetch {
            rows: live_rows(),
            failing_genre: Some("fantasy".to_string()),
            ..Default::default()
        });
        let config = refresh_config(&["fantasy", "picture", "mystery"], 2);
        let engine = Engine::assemble(config, catalog(), Arc::new(CacheGateway::local_only()))
            .unwrap()
            .with_live_fetch(live.clone());

        let report = engine.refresh().await.unwrap();
        assert_eq!(report.fetched_queries, 2);
        assert_eq!(report.failed_queries, 1);
        assert_eq!(report.skipped_by_quota, 1);
        assert_eq!(live.calls.load(Ordering::SeqCst), 2, "no call without quota");
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_refresh_needs_live_fetch_and_genres() {
        let engine =
            Engine::assemble(refresh_config(&["picture"], 10), catalog(), Arc::new(CacheGateway::local_only())).unwrap();
        assert!(engine.refresh().await.is_err(), "live fetch disabled");

        let engine = Engine::assemble(refresh_config(&[], 10), catalog(), Arc::new(CacheGateway::local_only()))
            .unwrap()
            .with_live_fetch(Arc::new(CannedLiveFetch::default()));
        assert!(engine.refresh().await.is_err(), "nothing to query");
    }

    #[tokio::test]
    async fn test_database_store_is_seeded_once_and_keeps_bumps() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("books.json");
        std::fs::write(
            &dataset,
            r#"[{"title": "Matilda", "isbn": "42", "genre": "Fiction", "age": 9, "pub_year": 1988}]"#,
        )
        .unwrap();

        let mut config = offline_config();
        config.catalog.path = dataset.clone();
        config.store.database_path = Some(dir.path().join("books.db"));

        {
            let engine = Engine::from_config(config.clone()).await.unwrap();
            let rec = engine.orchestrator.recommend_raw([("genre", "fiction")]).await.unwrap();
            assert_eq!(rec.books[0].id, "42");
        }

        // The dataset is only needed to seed an empty database
        std::fs::remove_file(&dataset).unwrap();
        let engine = Engine::from_config(config).await.unwrap();
        assert_eq!(engine.catalog.len(), 1);
        assert_eq!(engine.catalog.get("42").unwrap().popularity, 1, "bump persisted in the database");
    }
}
