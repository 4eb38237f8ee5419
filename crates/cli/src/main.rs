use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use data_loader::{CatalogFacets, CatalogIndex, FilterVocabulary, QueryFilters, YearCategory};
use pipeline::fingerprint::canonical_form;
use rand::seq::IndexedRandom;
use rand::Rng;
use server::{
    load_or_default, AttemptOutcome, Config, Confidence, DecisionTrace, Engine, Outcome,
    Recommendation,
};
use sources::QuotaTracker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// bookrecs - Children's Book Recommendation Engine
#[derive(Parser)]
#[command(name = "bookrecs")]
#[command(about = "Book recommendations from cache, catalog, live API and retrieval fallback", long_about = None)]
struct Cli {
    /// Path to the TOML configuration (defaults apply when missing)
    #[arg(short, long, default_value = "bookrecs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Query filters shared by several commands
#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Reader age in years (0-18)
    #[arg(long)]
    age: Option<String>,

    #[arg(long)]
    genre: Option<String>,

    /// Language code or name (en, english, ta, ...)
    #[arg(long)]
    language: Option<String>,

    /// One of before_2000, 2000_2010, 2010_2020, 2020_present
    #[arg(long)]
    year_category: Option<String>,
}

impl FilterArgs {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("age", &self.age),
            ("genre", &self.genre),
            ("language", &self.language),
            ("year_category", &self.year_category),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
        .collect()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Get book recommendations for a set of filters
    Recommend {
        #[command(flatten)]
        filters: FilterArgs,

        /// Show the decision trace
        #[arg(long)]
        explain: bool,

        /// Print the full payload as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the fingerprint (cache key) for a set of filters
    Fingerprint {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show today's live fetch quota usage
    Quota,

    /// Write every catalog record into the cache
    WarmCache,

    /// Pull new books from the live API into the store (spends quota)
    Refresh {
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the distinct filter values present in the catalog
    Facets,

    /// Run benchmark to test performance
    Benchmark {
        /// Number of requests to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Number of concurrent requests
        #[arg(long, default_value = "10")]
        concurrent: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Recommend {
            filters,
            explain,
            json,
        } => handle_recommend(config, filters, explain, json).await?,
        Commands::Fingerprint { filters } => handle_fingerprint(&config, &filters)?,
        Commands::Quota => handle_quota(&config),
        Commands::WarmCache => handle_warm_cache(config).await?,
        Commands::Refresh { json } => handle_refresh(config, json).await?,
        Commands::Facets => handle_facets(&config)?,
        Commands::Benchmark {
            requests,
            concurrent,
        } => handle_benchmark(config, requests, concurrent).await?,
    }

    Ok(())
}

async fn load_engine(config: Config) -> Result<Engine> {
    println!("Loading catalog from {}...", config.catalog.path.display());
    let start = Instant::now();
    let engine = Engine::from_config(config).await?;
    println!(
        "{} Loaded {} books in {:?} (cache: {})",
        "✓".green(),
        engine.catalog.len(),
        start.elapsed(),
        engine.cache.active_backend()
    );
    Ok(engine)
}

/// Handle the 'recommend' command
async fn handle_recommend(config: Config, filters: FilterArgs, explain: bool, json: bool) -> Result<()> {
    let engine = load_engine(config).await?;

    // Pipeline failures only carry a generic message and the correlation id
    let recommendation = engine.orchestrator.recommend_raw(filters.pairs()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
        return Ok(());
    }

    print_recommendation(&recommendation);
    if explain {
        print_trace(&recommendation.trace);
    }
    Ok(())
}

/// Handle the 'fingerprint' command
fn handle_fingerprint(config: &Config, filters: &FilterArgs) -> Result<()> {
    let vocabulary = FilterVocabulary::new(config.filters.genres.iter());
    let normalized = QueryFilters::from_pairs(filters.pairs(), &vocabulary)?;
    let fp = pipeline::fingerprint(&normalized);

    println!("{}", fp.as_str().bold());
    println!("  canonical: {}", canonical_form(&normalized));
    println!("  cache key: {}", fp.cache_key());
    Ok(())
}

/// Handle the 'quota' command
fn handle_quota(config: &Config) {
    let quota = match &config.quota.usage_file {
        Some(path) => QuotaTracker::with_usage_file(config.quota.daily_limit, path.clone()),
        None => QuotaTracker::in_memory(config.quota.daily_limit),
    };
    let state = quota.snapshot();

    println!("{}", "Live fetch quota:".bold().blue());
    println!("{}Date: {}", "• ".green(), state.date);
    println!("{}Used: {}", "• ".green(), state.count);
    println!("{}Remaining: {}", "• ".green(), quota.remaining());
    println!("{}Daily limit: {}", "• ".green(), quota.daily_limit());
    if config.quota.usage_file.is_none() {
        println!("{}", "(no usage_file configured; counts are per process)".dimmed());
    }
}

/// Handle the 'warm-cache' command
async fn handle_warm_cache(config: Config) -> Result<()> {
    let engine = load_engine(config).await?;
    let count = engine.warm_cache().await;
    println!("{} Cached {} books", "✓".green(), count);
    Ok(())
}

/// Handle the 'refresh' command
async fn handle_refresh(config: Config, json: bool) -> Result<()> {
    let engine = load_engine(config).await?;
    let report = engine.refresh().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Refresh summary:".bold().blue());
    println!("{}Queries sent: {}", "• ".green(), report.fetched_queries);
    println!("{}New books: {}", "• ".green(), report.inserted);
    println!("{}Updated books: {}", "• ".green(), report.updated);
    println!("{}Cache entries rewritten: {}", "• ".green(), report.cached);
    if report.skipped_by_quota > 0 {
        println!("{}", format!("Skipped {} queries: daily quota used up", report.skipped_by_quota).yellow());
    }
    if report.failed_queries > 0 {
        println!("{}", format!("Failed queries: {}", report.failed_queries).red());
    }
    println!("{}Quota remaining today: {}", "• ".green(), engine.quota.remaining());
    Ok(())
}

/// Handle the 'facets' command
fn handle_facets(config: &Config) -> Result<()> {
    let catalog = CatalogIndex::load_from_file(&config.catalog.path)
        .with_context(|| format!("Failed to load catalog {}", config.catalog.path.display()))?;
    let facets = catalog.facets();

    println!("{}", format!("Catalog facets ({} books):", catalog.len()).bold().blue());
    println!("{}Genres: {}", "• ".green(), facets.genres.join(", "));
    println!("{}Languages: {}", "• ".green(), facets.languages.join(", "));
    let ages: Vec<String> = facets.age_groups.iter().map(u8::to_string).collect();
    println!("{}Age groups: {}", "• ".green(), ages.join(", "));
    let categories: Vec<&str> = facets.year_categories.iter().map(YearCategory::as_str).collect();
    println!("{}Year categories: {}", "• ".green(), categories.join(", "));
    Ok(())
}

/// Random filter sets drawn from what the catalog actually contains
fn random_filter_sets(facets: &CatalogFacets, count: usize) -> Vec<Vec<(&'static str, String)>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let mut pairs = Vec::new();
            if let Some(genre) = facets.genres.choose(&mut rng).filter(|_| rng.random_bool(0.8)) {
                pairs.push(("genre", genre.clone()));
            }
            if let Some(age) = facets.age_groups.choose(&mut rng).filter(|_| rng.random_bool(0.5)) {
                pairs.push(("age", age.to_string()));
            }
            if let Some(language) = facets.languages.choose(&mut rng).filter(|_| rng.random_bool(0.5)) {
                pairs.push(("language", language.clone()));
            }
            if let Some(category) = facets.year_categories.choose(&mut rng).filter(|_| rng.random_bool(0.3)) {
                pairs.push(("year_category", category.as_str().to_string()));
            }
            pairs
        })
        .collect()
}

/// Handle the 'benchmark' command
async fn handle_benchmark(config: Config, requests: usize, concurrent: usize) -> Result<()> {
    let engine = load_engine(config).await?;
    let filter_sets = random_filter_sets(&engine.catalog.facets(), requests);
    let permits = Arc::new(Semaphore::new(concurrent.max(1)));

    let wall_clock = Instant::now();
    let mut handles = vec![];
    for pairs in filter_sets {
        let orchestrator = engine.orchestrator.clone();
        let permits = permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            let start = Instant::now();
            let recommendation = orchestrator.recommend_raw(pairs).await;
            Ok::<_, anyhow::Error>((start.elapsed(), recommendation.ok()))
        });
        handles.push(handle);
    }

    let mut timings = vec![];
    let mut failures = 0usize;
    let mut cache_hits = 0usize;
    for handle in handles {
        let (elapsed, recommendation) = handle.await??;
        timings.push(elapsed);
        match recommendation {
            Some(rec) if rec.served_from == Some(pipeline::SourceKind::Cache) => cache_hits += 1,
            Some(_) => {}
            None => failures += 1,
        }
    }
    let total_time = wall_clock.elapsed();

    if timings.is_empty() {
        println!("No requests made");
        return Ok(());
    }

    timings.sort();
    let sum: Duration = timings.iter().sum();
    let avg_latency = sum / (timings.len() as u32);
    let percentile = |p: f32| timings[((timings.len() as f32 * p) as usize).min(timings.len() - 1)];
    let throughput = timings.len() as f32 / total_time.as_secs_f32();

    println!("{}", "Benchmark results:".bold().blue());
    println!("Total time: {:?}", total_time);
    println!("Average latency: {:?}", avg_latency);
    println!("P50 latency: {:?}", percentile(0.50));
    println!("P95 latency: {:?}", percentile(0.95));
    println!("P99 latency: {:?}", percentile(0.99));
    println!("Throughput: {:.2} requests/second", throughput);
    println!("Cache hits: {} / {}", cache_hits, timings.len());
    if failures > 0 {
        println!("{}", format!("Failed requests: {}", failures).red());
    }

    Ok(())
}

/// Format and print a recommendation
fn print_recommendation(recommendation: &Recommendation) {
    let header = format!(
        "Book Recommendations ({}):",
        recommendation.served_from.map(|s| s.as_str()).unwrap_or("no source")
    );
    println!("{}", header.bold().blue());

    if recommendation.outcome == Outcome::NoResultsFound {
        println!("{}", "No books matched these filters.".yellow());
        return;
    }
    if recommendation.confidence == Confidence::Low {
        println!("{}", "Lower-confidence suggestions from the fallback search".yellow());
    }

    for (i, book) in recommendation.books.iter().enumerate() {
        let authors = if book.authors.is_empty() {
            "unknown author".to_string()
        } else {
            book.authors.join(", ")
        };
        println!(
            "{}. {} by {} [{}] - {} views",
            (i + 1).to_string().green(),
            book.title,
            authors,
            book.genre.as_deref().unwrap_or("-"),
            book.popularity
        );
        if book.soft_year_mismatch {
            println!("   {}", "published outside the requested period".dimmed());
        }
    }
}

fn print_trace(trace: &DecisionTrace) {
    println!();
    println!("{}", format!("Decision trace {}:", trace.correlation_id).bold());
    for attempt in &trace.attempts {
        let outcome = match attempt.outcome {
            AttemptOutcome::Hit => "hit".green(),
            AttemptOutcome::Miss => "miss".yellow(),
            AttemptOutcome::Error => "error".red(),
            AttemptOutcome::SkippedByQuota => "skipped (quota)".magenta(),
            AttemptOutcome::NotAttempted => "not attempted".dimmed(),
        };
        println!(
            "  {:<10} {:<16} {:>8.2}ms  {}",
            attempt.source.as_str(),
            outcome,
            attempt.latency_ms,
            attempt.reason
        );
    }
    println!("  total {:.2}ms", trace.total_latency_ms);
}
