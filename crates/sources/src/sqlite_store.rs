//! SQLite-backed [`Store`].
//!
//! Records live in a single `books` table. Two derived columns,
//! `genre_key` (trimmed, lowercased genre) and `language_code`, are written
//! alongside the raw values so exact-match filtering happens in SQL with the
//! same normalization as the in-memory catalog.
//!
//! Popularity is incremented in place (`popularity = popularity + ?`), so
//! concurrent bumps never lose updates and survive a restart.

use crate::error::SourceError;
use crate::traits::{Store, UpsertCounts};
use async_trait::async_trait;
use data_loader::{language_code, BookRecord, QueryFilters, SourceTag, YearCategory};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id            TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    authors       TEXT NOT NULL DEFAULT '[]',
    genre         TEXT,
    genre_key     TEXT,
    language      TEXT,
    language_code TEXT,
    age_group     INTEGER,
    year_category TEXT,
    popularity    INTEGER NOT NULL DEFAULT 0,
    description   TEXT,
    thumbnail_url TEXT
)
"#;

const COLUMNS: &str =
    "id, title, authors, genre, language, age_group, year_category, popularity, description, thumbnail_url";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SourceError::Storage(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        info!("Opened book store at {}", path.display());
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SourceError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_genre_key ON books (genre_key)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, SourceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM books").fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Every stored record, in insertion order
    pub async fn all(&self) -> Result<Vec<BookRecord>, SourceError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM books ORDER BY rowid"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Load `records` only when the table is empty. Returns how many were written.
    pub async fn seed_if_empty(&self, records: &[BookRecord]) -> Result<usize, SourceError> {
        if self.count().await? > 0 {
            debug!("Book store already populated, skipping seed");
            return Ok(0);
        }
        let counts = self.upsert(records).await?;
        info!("Seeded book store with {} records", counts.inserted);
        Ok(counts.inserted)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<BookRecord, SourceError> {
    let authors: String = row.try_get("authors")?;
    let authors: Vec<String> =
        serde_json::from_str(&authors).map_err(|e| SourceError::Decode(format!("authors column: {e}")))?;
    let age_group: Option<i64> = row.try_get("age_group")?;
    let year_category: Option<String> = row.try_get("year_category")?;
    let popularity: i64 = row.try_get("popularity")?;

    let id: String = row.try_get("id")?;
    let title: String = row.try_get("title")?;

    let mut record = BookRecord::new(id, title, SourceTag::Store);
    record.authors = authors;
    record.genre = row.try_get("genre")?;
    record.language = row.try_get("language")?;
    record.age_group = age_group.and_then(|age| u8::try_from(age).ok());
    record.year_category = year_category.and_then(|c| c.parse::<YearCategory>().ok());
    record.popularity = u64::try_from(popularity).unwrap_or_default();
    record.description = row.try_get("description")?;
    record.thumbnail_url = row.try_get("thumbnail_url")?;
    Ok(record)
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, filters))]
    async fn query(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM books
             WHERE (?1 IS NULL OR age_group = ?1)
               AND (?2 IS NULL OR genre_key = ?2)
               AND (?3 IS NULL OR language_code = ?3)
               AND (?4 IS NULL OR year_category = ?4)
             ORDER BY rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(filters.age_group().map(i64::from))
            .bind(filters.genre())
            .bind(filters.language())
            .bind(filters.year_category().map(|c| c.as_str()))
            .fetch_all(&self.pool)
            .await?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
        debug!("Store matched {} records", records.len());
        Ok(records)
    }

    async fn update_popularity(&self, id: &str, delta: u64) -> Result<(), SourceError> {
        let result = sqlx::query("UPDATE books SET popularity = popularity + ? WHERE id = ?")
            .bind(i64::try_from(delta).unwrap_or(i64::MAX))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SourceError::UnknownRecord(id.to_string()));
        }
        Ok(())
    }

    async fn upsert(&self, records: &[BookRecord]) -> Result<UpsertCounts, SourceError> {
        let mut counts = UpsertCounts::default();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let exists = sqlx::query("SELECT 1 FROM books WHERE id = ?")
                .bind(&record.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            let authors =
                serde_json::to_string(&record.authors).map_err(|e| SourceError::Decode(e.to_string()))?;

            // Unknown facets on the incoming record keep the stored value
            sqlx::query(
                r#"
                INSERT INTO books (id, title, authors, genre, genre_key, language, language_code,
                                   age_group, year_category, popularity, description, thumbnail_url)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    authors = excluded.authors,
                    genre = COALESCE(excluded.genre, books.genre),
                    genre_key = COALESCE(excluded.genre_key, books.genre_key),
                    language = COALESCE(excluded.language, books.language),
                    language_code = COALESCE(excluded.language_code, books.language_code),
                    age_group = COALESCE(excluded.age_group, books.age_group),
                    year_category = COALESCE(excluded.year_category, books.year_category),
                    description = COALESCE(excluded.description, books.description),
                    thumbnail_url = COALESCE(excluded.thumbnail_url, books.thumbnail_url)
                "#,
            )
            .bind(&record.id)
            .bind(&record.title)
            .bind(authors)
            .bind(&record.genre)
            .bind(record.genre.as_deref().map(|g| g.trim().to_lowercase()))
            .bind(&record.language)
            .bind(record.language.as_deref().map(language_code))
            .bind(record.age_group.map(i64::from))
            .bind(record.year_category.map(|c| c.as_str()))
            .bind(i64::try_from(record.popularity).unwrap_or(i64::MAX))
            .bind(&record.description)
            .bind(&record.thumbnail_url)
            .execute(&mut *tx)
            .await?;

            if exists {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(counts)
    }
}
