//! Live fetch adapter for the Google Books volumes API.
//!
//! ## Request
//! `q=subject:<genre>` (or `children` when no genre is requested),
//! `langRestrict=<language>`, `maxResults=<n>` and an optional `key`.
//!
//! ## Normalization
//! Each `volumeInfo` becomes one [`BookRecord`]: ISBN_13 is preferred as the
//! identifier, then the first industry identifier, then a surrogate. The
//! publication date is bucketed into a [`YearCategory`] and never kept raw.
//! API categories do not follow the catalog's genre vocabulary, so genre is
//! left unknown here and filled in from the request downstream.

use crate::error::SourceError;
use crate::traits::LiveFetch;
use async_trait::async_trait;
use data_loader::{BookRecord, QueryFilters, SourceTag, YearCategory};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/books/v1/volumes";

/// Query used when the caller did not ask for a genre
const DEFAULT_SUBJECT: &str = "children";

#[derive(Debug, Default, Deserialize)]
pub struct VolumesResponse {
    #[serde(default)]
    pub items: Vec<Volume>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Volume {
    #[serde(rename = "volumeInfo", default)]
    pub volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub industry_identifiers: Vec<IndustryIdentifier>,
    pub image_links: Option<ImageLinks>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageLinks {
    pub thumbnail: Option<String>,
}

/// HTTP client for the volumes endpoint
pub struct GoogleBooksFetcher {
    client: reqwest::Client,
    endpoint: String,
    max_results: u32,
    api_key: Option<String>,
}

impl GoogleBooksFetcher {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_results: 40,
            api_key: None,
        })
    }

    /// Configure the page size requested from the API (default: 40)
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Query-string parameters for one request
    pub fn query_params(&self, filters: &QueryFilters) -> Vec<(&'static str, String)> {
        let q = match filters.genre() {
            Some(genre) => format!("subject:{genre}"),
            None => DEFAULT_SUBJECT.to_string(),
        };

        let mut params = vec![("q", q), ("maxResults", self.max_results.to_string())];
        if let Some(language) = filters.language() {
            params.push(("langRestrict", language.to_string()));
        }
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        params
    }
}

#[async_trait]
impl LiveFetch for GoogleBooksFetcher {
    #[instrument(skip(self, filters), fields(endpoint = %self.endpoint))]
    async fn fetch(&self, filters: &QueryFilters) -> Result<Vec<BookRecord>, SourceError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query_params(filters))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                endpoint: self.endpoint.clone(),
            });
        }

        let body: VolumesResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let records = normalize_volumes(body);
        debug!("Live fetch returned {} volumes", records.len());
        Ok(records)
    }
}

/// Map an API response onto book records. Volumes without a title are dropped.
pub fn normalize_volumes(response: VolumesResponse) -> Vec<BookRecord> {
    response
        .items
        .into_iter()
        .filter_map(|volume| normalize_volume(volume.volume_info))
        .collect()
}

fn normalize_volume(info: VolumeInfo) -> Option<BookRecord> {
    let title = info.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;

    let id = info
        .industry_identifiers
        .iter()
        .find(|i| i.kind == "ISBN_13")
        .or_else(|| info.industry_identifiers.first())
        .map(|i| i.identifier.clone())
        .unwrap_or_else(|| BookRecord::surrogate_id(&title, &info.authors));

    let mut record = BookRecord::new(id, title, SourceTag::LiveFetch);
    record.authors = info.authors;
    record.language = info.language;
    record.year_category = info.published_date.as_deref().and_then(YearCategory::from_year);
    record.description = info.description.filter(|d| !d.is_empty());
    record.thumbnail_url = info.image_links.and_then(|links| links.thumbnail);
    Some(record)
}
