//! TOML configuration.
//!
//! Every section and field is optional; an empty file (or no file at all)
//! yields [`Config::default`]. Example:
//!
//! ```toml
//! [catalog]
//! path = "data/books_dataset.json"
//!
//! [store]
//! database_path = "data/books.db"
//!
//! [cache]
//! url = "redis://127.0.0.1:6379"
//! ttl_secs = 3600
//! retrieval_ttl_secs = 300
//!
//! [quota]
//! daily_limit = 600
//! usage_file = "data/api_usage.json"
//!
//! [live_fetch]
//! enabled = true
//! max_results = 40
//!
//! [ranking]
//! top_k = 20
//!
//! [refresh]
//! genres = ["fantasy", "mystery"]
//! languages = ["en", "ta"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub live_fetch: LiveFetchConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/books_dataset.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Networked backend; absent means the in-process cache only
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Absent means retrieval results are never promoted
    #[serde(default)]
    pub retrieval_ttl_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl_secs: default_cache_ttl(),
            retrieval_ttl_secs: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}
fn default_connect_timeout_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Absent means the count is kept in memory only
    #[serde(default)]
    pub usage_file: Option<PathBuf>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            usage_file: None,
        }
    }
}

fn default_daily_limit() -> u32 {
    sources::quota::DEFAULT_DAILY_LIMIT
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveFetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LiveFetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            max_results: default_max_results(),
            api_key: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_endpoint() -> String {
    sources::live_fetch::DEFAULT_ENDPOINT.to_string()
}
fn default_max_results() -> u32 {
    40
}

/// Upper bound on each source call
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_store_ms")]
    pub store_ms: u64,
    #[serde(default = "default_live_fetch_ms")]
    pub live_fetch_ms: u64,
    #[serde(default = "default_retrieval_ms")]
    pub retrieval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_ms: default_store_ms(),
            live_fetch_ms: default_live_fetch_ms(),
            retrieval_ms: default_retrieval_ms(),
        }
    }
}

fn default_store_ms() -> u64 {
    2_000
}
fn default_live_fetch_ms() -> u64 {
    10_000
}
fn default_retrieval_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_max_candidates() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// SQLite file; absent serves the catalog from memory and bumps are lost on exit.
    /// An empty database is seeded from `catalog.path`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Queries run by `refresh`, one per genre and language pair
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RefreshConfig {
    /// Falls back to `filters.genres` when empty
    #[serde(default)]
    pub genres: Vec<String>,
    /// Empty runs each genre without a language constraint
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Config {
    /// Genres the refresh job queries
    pub fn refresh_genres(&self) -> &[String] {
        if self.refresh.genres.is_empty() {
            &self.filters.genres
        } else {
            &self.refresh.genres
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FiltersConfig {
    /// Allowed genres; empty accepts any genre
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RankingConfig {
    /// Absent returns the full ranked list
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TraceConfig {
    /// Developer log: one JSON line per finalized trace
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retrieval_ttl(&self) -> Option<Duration> {
        self.retrieval_ttl_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` if it exists, otherwise fall back to defaults
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate cache
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if let Some(retrieval_ttl) = config.cache.retrieval_ttl_secs {
        if retrieval_ttl == 0 || retrieval_ttl >= config.cache.ttl_secs {
            anyhow::bail!(
                "cache.retrieval_ttl_secs must be > 0 and shorter than cache.ttl_secs ({})",
                config.cache.ttl_secs
            );
        }
    }

    // Validate timeouts
    let timeouts = &config.timeouts;
    if timeouts.store_ms == 0 || timeouts.live_fetch_ms == 0 || timeouts.retrieval_ms == 0 {
        anyhow::bail!("timeouts.* must be > 0");
    }

    // Validate live fetch
    if config.live_fetch.enabled {
        if !(1..=40).contains(&config.live_fetch.max_results) {
            anyhow::bail!("live_fetch.max_results must be in [1, 40]");
        }
        let endpoint = &config.live_fetch.endpoint;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            anyhow::bail!("live_fetch.endpoint must be an http(s) URL, got '{}'", endpoint);
        }
    }

    if config.retrieval.max_candidates == 0 {
        anyhow::bail!("retrieval.max_candidates must be >= 1");
    }

    if config.ranking.top_k == Some(0) {
        anyhow::bail!("ranking.top_k must be >= 1 when set");
    }

    Ok(())
}
