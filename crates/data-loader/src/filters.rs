//! Query filter set: the normalized, validated form of a caller's request.
//!
//! Raw key/value pairs are validated once at the boundary with
//! [`QueryFilters::from_pairs`]. After that the set is immutable, and a
//! missing key means "unconstrained".

use crate::error::ValidationError;
use crate::types::{language_code, BookRecord, YearCategory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Highest age accepted for the children's catalogue
pub const MAX_AGE_GROUP: u8 = 18;

/// Recognized filter keys, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKey {
    AgeGroup,
    Genre,
    Language,
    YearCategory,
}

impl FilterKey {
    pub const ALL: [FilterKey; 4] = [
        FilterKey::AgeGroup,
        FilterKey::Genre,
        FilterKey::Language,
        FilterKey::YearCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::AgeGroup => "age_group",
            FilterKey::Genre => "genre",
            FilterKey::Language => "language",
            FilterKey::YearCategory => "year_category",
        }
    }
}

impl FromStr for FilterKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "age" | "age_group" => Ok(FilterKey::AgeGroup),
            "genre" => Ok(FilterKey::Genre),
            "language" => Ok(FilterKey::Language),
            "year_category" => Ok(FilterKey::YearCategory),
            _ => Err(ValidationError::UnknownKey(s.to_string())),
        }
    }
}

/// Allowed value sets that come from static configuration.
#[derive(Debug, Clone, Default)]
pub struct FilterVocabulary {
    /// Lower-cased allowed genres; empty means any non-empty genre is accepted
    genres: HashSet<String>,
}

impl FilterVocabulary {
    pub fn new<I, S>(genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            genres: genres
                .into_iter()
                .map(|g| g.as_ref().trim().to_lowercase())
                .filter(|g| !g.is_empty())
                .collect(),
        }
    }

    fn allows_genre(&self, genre: &str) -> bool {
        self.genres.is_empty() || self.genres.contains(genre)
    }
}

/// Normalized query filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
    age_group: Option<u8>,
    genre: Option<String>,
    language: Option<String>,
    year_category: Option<YearCategory>,
}

impl QueryFilters {
    /// The empty filter set: no constraints at all
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Validate and normalize raw key/value pairs.
    ///
    /// Values are trimmed and case-folded before validation. An empty value
    /// leaves the key unconstrained.
    pub fn from_pairs<I, K, V>(pairs: I, vocabulary: &FilterVocabulary) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filters = Self::default();
        let mut seen = HashSet::new();

        for (raw_key, raw_value) in pairs {
            let key: FilterKey = raw_key.as_ref().parse()?;
            if !seen.insert(key) {
                return Err(ValidationError::DuplicateKey(key.as_str().to_string()));
            }

            let value = raw_value.as_ref().trim().to_lowercase();
            if value.is_empty() {
                continue;
            }

            match key {
                FilterKey::AgeGroup => filters.age_group = Some(parse_age(&value)?),
                FilterKey::Genre => {
                    if !vocabulary.allows_genre(&value) {
                        return Err(invalid(key, &value, "genre is not in the allowed list"));
                    }
                    filters.genre = Some(value);
                }
                FilterKey::Language => filters.language = Some(parse_language(&value)?),
                FilterKey::YearCategory => {
                    let category = value
                        .parse::<YearCategory>()
                        .map_err(|reason| invalid(key, &value, &reason))?;
                    filters.year_category = Some(category);
                }
            }
        }

        Ok(filters)
    }

    pub fn age_group(&self) -> Option<u8> {
        self.age_group
    }

    pub fn genre(&self) -> Option<&str> {
        self.genre.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn year_category(&self) -> Option<YearCategory> {
        self.year_category
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }

    /// `(key, value)` for every recognized key in canonical order.
    ///
    /// Unconstrained keys map to an empty string, so the sequence always has
    /// the same length and order regardless of how the set was built.
    pub fn canonical_pairs(&self) -> Vec<(&'static str, String)> {
        FilterKey::ALL
            .into_iter()
            .map(|key| {
                let value = match key {
                    FilterKey::AgeGroup => self.age_group.map(|a| a.to_string()),
                    FilterKey::Genre => self.genre.clone(),
                    FilterKey::Language => self.language.clone(),
                    FilterKey::YearCategory => self.year_category.map(|c| c.as_str().to_string()),
                };
                (key.as_str(), value.unwrap_or_default())
            })
            .collect()
    }

    /// Exact-match test on the provided keys only.
    pub fn matches(&self, record: &BookRecord) -> bool {
        if let Some(age) = self.age_group {
            if record.age_group != Some(age) {
                return false;
            }
        }
        if let Some(genre) = &self.genre {
            let record_genre = record.genre.as_deref().map(|g| g.trim().to_lowercase());
            if record_genre.as_deref() != Some(genre.as_str()) {
                return false;
            }
        }
        if let Some(language) = &self.language {
            let record_language = record.language.as_deref().map(language_code);
            if record_language.as_deref() != Some(language.as_str()) {
                return false;
            }
        }
        if let Some(category) = self.year_category {
            if record.year_category != Some(category) {
                return false;
            }
        }
        true
    }
}

fn invalid(key: FilterKey, value: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        key: key.as_str(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_age(value: &str) -> Result<u8, ValidationError> {
    match value.parse::<u8>() {
        Ok(age) if age <= MAX_AGE_GROUP => Ok(age),
        _ => Err(invalid(
            FilterKey::AgeGroup,
            value,
            &format!("expected a whole number between 0 and {MAX_AGE_GROUP}"),
        )),
    }
}

fn parse_language(value: &str) -> Result<String, ValidationError> {
    let code = language_code(value);
    let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic());
    if valid {
        Ok(code)
    } else {
        Err(invalid(
            FilterKey::Language,
            value,
            "expected a language name or a 2-3 letter code",
        ))
    }
}
