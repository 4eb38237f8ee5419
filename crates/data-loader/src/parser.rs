//! Parser for the JSON book dataset.
//!
//! The dataset is a top-level array of loosely shaped objects. Field names
//! vary between exports (`author` vs `authors`, `age` vs `age_group`,
//! `pub_year` vs `year`), so each entry is read into a permissive raw shape and
//! then normalized into a [`BookRecord`].

use crate::error::{DataLoadError, Result};
use crate::types::{BookRecord, SourceTag, YearCategory};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// One dataset entry as it appears on disk
#[derive(Debug, Deserialize)]
struct RawBook {
    title: Option<String>,
    #[serde(default)]
    authors: Option<Authors>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    isbn: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default, alias = "age_group")]
    age: Option<Value>,
    #[serde(default, alias = "year", alias = "publication_year")]
    pub_year: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    popularity: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Authors {
    Many(Vec<String>),
    One(String),
}

/// Parse the dataset file at `path`.
pub fn parse_books(path: &Path) -> Result<Vec<BookRecord>> {
    if !path.exists() {
        return Err(DataLoadError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    parse_books_str(&content, &path.display().to_string())
}

/// Parse dataset content already in memory.
///
/// `file` is only used to label errors. Entries without a usable title are
/// skipped with a warning rather than failing the whole load.
pub fn parse_books_str(content: &str, file: &str) -> Result<Vec<BookRecord>> {
    let value: Value = serde_json::from_str(content).map_err(|e| DataLoadError::ParseError {
        file: file.to_string(),
        reason: e.to_string(),
    })?;

    let Value::Array(entries) = value else {
        return Err(DataLoadError::ParseError {
            file: file.to_string(),
            reason: "expected a list at top level".to_string(),
        });
    };

    // Normalize in parallel; collect preserves input order
    let records: Vec<Option<BookRecord>> = entries
        .into_par_iter()
        .enumerate()
        .map(|(idx, entry)| match serde_json::from_value::<RawBook>(entry) {
            Ok(raw) => normalize_raw(raw, idx),
            Err(e) => {
                warn!("Skipping entry {} in {}: {}", idx, file, e);
                None
            }
        })
        .collect();

    Ok(records.into_iter().flatten().collect())
}

fn normalize_raw(raw: RawBook, idx: usize) -> Option<BookRecord> {
    let title = raw.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    let Some(title) = title else {
        warn!("Skipping entry {}: missing title", idx);
        return None;
    };

    let authors: Vec<String> = match (raw.authors, raw.author) {
        (Some(Authors::Many(list)), _) => list,
        (Some(Authors::One(one)), _) | (None, Some(one)) => one
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        (None, None) => Vec::new(),
    };

    let id = raw
        .isbn
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| BookRecord::surrogate_id(&title, &authors));

    let mut record = BookRecord::new(id, title, SourceTag::Store);
    record.authors = authors;
    record.genre = non_empty(raw.genre);
    record.language = non_empty(raw.language);
    record.age_group = raw.age.as_ref().and_then(parse_age_value);
    record.year_category = raw
        .pub_year
        .as_ref()
        .and_then(value_as_text)
        .and_then(|y| YearCategory::from_year(&y));
    record.popularity = raw.popularity.unwrap_or(0);
    record.description = non_empty(raw.description);
    record.thumbnail_url = non_empty(raw.thumbnail_url);
    Some(record)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_age_value(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"title": "The Gruffalo", "authors": ["Julia Donaldson"], "isbn": "9780333710937",
         "language": "en", "genre": "Picture Book", "age": 4, "pub_year": "1999", "popularity": 12},
        {"title": "Ponniyin Selvan (Kids)", "author": "Kalki, Retold Team", "language": "ta",
         "genre": "History", "age_group": "10", "year": 2021},
        {"title": "   ", "isbn": "no-title"},
        {"authors": ["Nobody"]}
    ]"#;

    #[test]
    fn test_parse_books_normalizes_fields() {
        let books = parse_books_str(SAMPLE, "sample.json").unwrap();
        assert_eq!(books.len(), 2, "entries without a title are skipped");

        let gruffalo = &books[0];
        assert_eq!(gruffalo.id, "9780333710937");
        assert_eq!(gruffalo.authors, vec!["Julia Donaldson".to_string()]);
        assert_eq!(gruffalo.age_group, Some(4));
        assert_eq!(gruffalo.year_category, Some(YearCategory::Before2000));
        assert_eq!(gruffalo.popularity, 12);
        assert_eq!(gruffalo.source, SourceTag::Store);

        let selvan = &books[1];
        assert!(selvan.id.starts_with("surrogate-"), "missing ISBN gets a surrogate id");
        assert_eq!(selvan.authors.len(), 2);
        assert_eq!(selvan.age_group, Some(10));
        assert_eq!(selvan.year_category, Some(YearCategory::From2020ToPresent));
    }

    #[test]
    fn test_parse_books_rejects_non_list() {
        let err = parse_books_str(r#"{"title": "x"}"#, "obj.json").unwrap_err();
        assert!(matches!(err, DataLoadError::ParseError { .. }));
    }

    #[test]
    fn test_parse_books_rejects_invalid_json() {
        assert!(parse_books_str("[{", "broken.json").is_err());
    }

    #[test]
    fn test_parse_books_missing_file() {
        let err = parse_books(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, DataLoadError::FileNotFound { .. }));
    }
}
