//! Core domain types for the book catalogue.
//!
//! Every source adapter maps its native shape into [`BookRecord`], so the rest
//! of the system only ever deals with one fixed record layout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Type Aliases
// =============================================================================

/// Stable identifier for a book (ISBN when known, synthesized surrogate otherwise)
pub type BookId = String;

// =============================================================================
// Source Tag
// =============================================================================

/// Which adapter produced a record.
///
/// Records served from the cache keep the tag of the adapter that originally
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Store,
    LiveFetch,
    Retrieval,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Store => "store",
            SourceTag::LiveFetch => "live_fetch",
            SourceTag::Retrieval => "retrieval",
        }
    }

    /// Retrieval output is lower-confidence than authoritative or live data
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, SourceTag::Retrieval)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Year Category
// =============================================================================

/// Bucketed publication period. The raw year is never exposed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum YearCategory {
    #[serde(rename = "before_2000")]
    Before2000,
    #[serde(rename = "2000_2010")]
    From2000To2010,
    #[serde(rename = "2010_2020")]
    From2010To2020,
    #[serde(rename = "2020_present")]
    From2020ToPresent,
}

impl YearCategory {
    pub const ALL: [YearCategory; 4] = [
        YearCategory::Before2000,
        YearCategory::From2000To2010,
        YearCategory::From2010To2020,
        YearCategory::From2020ToPresent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            YearCategory::Before2000 => "before_2000",
            YearCategory::From2000To2010 => "2000_2010",
            YearCategory::From2010To2020 => "2010_2020",
            YearCategory::From2020ToPresent => "2020_present",
        }
    }

    /// Bucket a raw publication year.
    ///
    /// Accepts `"2016"`, `"2016-04"` or `"2016-04-12"`; anything whose leading
    /// segment is not a number yields `None`.
    ///
    /// Buckets: `< 2000`, `2000..=2010`, `2011..=2020`, later.
    pub fn from_year(raw: &str) -> Option<Self> {
        let head = raw.trim().split('-').next()?.trim();
        let year: i32 = head.parse().ok()?;

        Some(match year {
            y if y < 2000 => YearCategory::Before2000,
            2000..=2010 => YearCategory::From2000To2010,
            2011..=2020 => YearCategory::From2010To2020,
            _ => YearCategory::From2020ToPresent,
        })
    }
}

impl fmt::Display for YearCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for YearCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        YearCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| "expected one of before_2000, 2000_2010, 2010_2020, 2020_present".to_string())
    }
}

// =============================================================================
// Book Record
// =============================================================================

/// Canonical book shape shared by every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub age_group: Option<u8>,
    #[serde(default)]
    pub year_category: Option<YearCategory>,
    /// Access counter used for ranking
    #[serde(default)]
    pub popularity: u64,
    pub source: SourceTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Set when the record's year category differs from the one requested
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub soft_year_mismatch: bool,
}

impl BookRecord {
    /// Minimal record; remaining fields default to unknown.
    pub fn new(id: impl Into<BookId>, title: impl Into<String>, source: SourceTag) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            genre: None,
            language: None,
            age_group: None,
            year_category: None,
            popularity: 0,
            source,
            description: None,
            thumbnail_url: None,
            soft_year_mismatch: false,
        }
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    /// Deterministic identifier for records that arrive without one.
    ///
    /// Derived from the normalized title and lower-cased authors so the same
    /// book gets the same surrogate across runs and sources.
    pub fn surrogate_id(title: &str, authors: &[String]) -> BookId {
        let mut hasher = Sha256::new();
        hasher.update(normalize_title(title).as_bytes());
        for author in authors {
            hasher.update(b"\x1f");
            hasher.update(author.trim().to_lowercase().as_bytes());
        }
        let digest = hasher.finalize();
        format!("surrogate-{}", hex::encode(&digest[..8]))
    }
}

/// Title form used for duplicate detection across sources.
///
/// Lower-cases, drops punctuation and collapses runs of whitespace, so
/// `"The  Gruffalo!"` and `"the gruffalo"` compare equal.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a language display name to its short code.
///
/// Unknown names pass through lower-cased.
pub fn language_code(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    match lowered.as_str() {
        "english" => "en".to_string(),
        "tamil" => "ta".to_string(),
        "hindi" => "hi".to_string(),
        _ => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_category_buckets() {
        assert_eq!(YearCategory::from_year("1999"), Some(YearCategory::Before2000));
        assert_eq!(YearCategory::from_year("2000"), Some(YearCategory::From2000To2010));
        assert_eq!(YearCategory::from_year("2010-05-01"), Some(YearCategory::From2000To2010));
        assert_eq!(YearCategory::from_year("2011"), Some(YearCategory::From2010To2020));
        assert_eq!(YearCategory::from_year("2020-12"), Some(YearCategory::From2010To2020));
        assert_eq!(YearCategory::from_year("2024"), Some(YearCategory::From2020ToPresent));
        assert_eq!(YearCategory::from_year(""), None);
        assert_eq!(YearCategory::from_year("unknown"), None);
    }

    #[test]
    fn test_year_category_labels_round_trip_through_from_str() {
        for category in YearCategory::ALL {
            assert_eq!(category.as_str().parse::<YearCategory>(), Ok(category));
        }
        assert!("1990s".parse::<YearCategory>().is_err());
    }

    #[test]
    fn test_year_category_serializes_as_label() {
        let json = serde_json::to_string(&YearCategory::From2010To2020).unwrap();
        assert_eq!(json, "\"2010_2020\"");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  The  Gruffalo! "), "the gruffalo");
        assert_eq!(normalize_title("Where's Spot?"), "where s spot");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_surrogate_id_is_stable_and_title_sensitive() {
        let authors = vec!["Julia Donaldson".to_string()];
        let a = BookRecord::surrogate_id("The Gruffalo", &authors);
        let b = BookRecord::surrogate_id("the gruffalo!", &authors);
        let c = BookRecord::surrogate_id("Room on the Broom", &authors);

        assert_eq!(a, b, "normalized titles should share a surrogate");
        assert_ne!(a, c);
        assert!(a.starts_with("surrogate-"));
    }

    #[test]
    fn test_language_code() {
        assert_eq!(language_code("English"), "en");
        assert_eq!(language_code(" tamil "), "ta");
        assert_eq!(language_code("fr"), "fr");
    }

    #[test]
    fn test_record_serialization_skips_empty_optionals() {
        let record = BookRecord::new("978-1", "Gruffalo", SourceTag::Store);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("description").is_none());
        assert!(json.get("soft_year_mismatch").is_none());
        assert_eq!(json["source"], "store");
    }
}
