//! Read-only music metadata lookup (iTunes Search compatible).
//!
//! Unrelated to schedule extraction, but shares the token-bucket limiter and
//! daily call accounting with the other external clients.

use crate::config::{FetchConfig, MusicConfig};
use crate::domain::EndpointClass;
use crate::extraction::TokenBucket;
use crate::metrics::MetricsAccountant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}")]
    Api(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Artwork in the three sizes the search API serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    pub small_30: Option<String>,
    pub medium_60: Option<String>,
    pub large_100: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Short audio preview, when the catalogue has one
    pub preview_url: Option<String>,
    pub artwork: Artwork,
}

#[async_trait]
pub trait MusicMetadataProvider: Send + Sync {
    async fn search_tracks(&self, term: &str, limit: usize) -> Result<Vec<TrackMetadata>, MusicError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    preview_url: Option<String>,
    artwork_url30: Option<String>,
    artwork_url60: Option<String>,
    artwork_url100: Option<String>,
}

impl SearchItem {
    fn into_track(self) -> Option<TrackMetadata> {
        Some(TrackMetadata {
            title: self.track_name?,
            artist: self.artist_name?,
            album: self.collection_name,
            preview_url: self.preview_url,
            artwork: Artwork {
                small_30: self.artwork_url30,
                medium_60: self.artwork_url60,
                large_100: self.artwork_url100,
            },
        })
    }
}

fn parse_search(body: &str) -> Result<Vec<TrackMetadata>, MusicError> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| MusicError::Parse(e.to_string()))?;
    Ok(response.results.into_iter().filter_map(SearchItem::into_track).collect())
}

pub struct ItunesClient {
    http_client: reqwest::Client,
    base_url: String,
    limiter: TokenBucket,
    accountant: Option<Arc<MetricsAccountant>>,
}

impl ItunesClient {
    pub fn new(config: &MusicConfig, fetch: &FetchConfig) -> Result<Self, MusicError> {
        let http_client = reqwest::Client::builder()
            .user_agent(fetch.user_agent.clone())
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MusicError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: TokenBucket::new(config.requests_per_minute, 1),
            accountant: None,
        })
    }

    pub fn with_accountant(mut self, accountant: Arc<MetricsAccountant>) -> Self {
        self.accountant = Some(accountant);
        self
    }

    async fn request(&self, term: &str, limit: usize) -> Result<String, MusicError> {
        let limit = limit.clamp(1, 200).to_string();
        let response = self
            .http_client
            .get(format!("{}/search", self.base_url))
            .query(&[("term", term), ("media", "music"), ("entity", "song"), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| MusicError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MusicError::Api(status.as_u16()));
        }
        response.text().await.map_err(|e| MusicError::Network(e.to_string()))
    }
}

#[async_trait]
impl MusicMetadataProvider for ItunesClient {
    async fn search_tracks(&self, term: &str, limit: usize) -> Result<Vec<TrackMetadata>, MusicError> {
        let waited = self.limiter.acquire().await;
        if !waited.is_zero() {
            debug!("Music lookup rate limited: waited {:?}", waited);
        }

        let started = Instant::now();
        let result = self.request(term, limit).await;
        if let Some(accountant) = &self.accountant {
            accountant
                .record(EndpointClass::MusicMetadata, started.elapsed(), result.is_ok())
                .await;
        }
        parse_search(&result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_results() {
        let body = r#"{"resultCount": 2, "results": [
            {"trackName": "Don't Stop Believin'", "artistName": "Journey", "collectionName": "Escape",
             "previewUrl": "https://audio.example.com/p.m4a",
             "artworkUrl30": "https://img.example.com/30.jpg",
             "artworkUrl60": "https://img.example.com/60.jpg",
             "artworkUrl100": "https://img.example.com/100.jpg"},
            {"artistName": "Nameless"}
        ]}"#;
        let tracks = parse_search(body).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].artist, "Journey");
        assert_eq!(tracks[0].artwork.large_100.as_deref(), Some("https://img.example.com/100.jpg"));
    }

    #[test]
    fn test_missing_preview_is_allowed() {
        let body = r#"{"results": [{"trackName": "Total Eclipse of the Heart", "artistName": "Bonnie Tyler"}]}"#;
        let tracks = parse_search(body).unwrap();
        assert_eq!(tracks[0].preview_url, None);
        assert_eq!(tracks[0].artwork.small_30, None);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(parse_search("<html>"), Err(MusicError::Parse(_))));
    }
}
