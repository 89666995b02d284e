//! Best-effort geocoding of venues.

use crate::config::{FetchConfig, GeocodeConfig};
use crate::domain::EndpointClass;
use crate::error::{ProcessingFailure, Result};
use crate::extraction::TokenBucket;
use crate::metrics::MetricsAccountant;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub state: Option<String>,
    pub display_name: String,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text location. Unresolvable queries are `GeocodeUnresolved`.
    async fn geocode(&self, query: &str) -> std::result::Result<GeoPoint, ProcessingFailure>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
}

/// Nominatim search client behind a token bucket
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    limiter: TokenBucket,
    accountant: Option<Arc<MetricsAccountant>>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodeConfig, fetch: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(fetch.user_agent.clone())
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: TokenBucket::new(config.requests_per_minute, 1),
            accountant: None,
        })
    }

    pub fn with_accountant(mut self, accountant: Arc<MetricsAccountant>) -> Self {
        self.accountant = Some(accountant);
        self
    }

    async fn search(&self, query: &str) -> std::result::Result<Vec<NominatimPlace>, String> {
        let resp = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "jsonv2"), ("addressdetails", "1"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP status {}", resp.status().as_u16()));
        }
        resp.json().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> std::result::Result<GeoPoint, ProcessingFailure> {
        if query.trim().is_empty() {
            return Err(ProcessingFailure::GeocodeUnresolved(query.to_string()));
        }
        self.limiter.acquire().await;

        let started = Instant::now();
        let result = self.search(query).await;
        if let Some(accountant) = &self.accountant {
            accountant
                .record(EndpointClass::Geocode, started.elapsed(), result.is_ok())
                .await;
        }

        let places = result.map_err(|e| {
            debug!(query, "Geocode request failed: {}", e);
            ProcessingFailure::GeocodeUnresolved(query.to_string())
        })?;
        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| ProcessingFailure::GeocodeUnresolved(query.to_string()))?;
        let latitude = place.lat.parse::<f64>().ok();
        let longitude = place.lon.parse::<f64>().ok();
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Ok(GeoPoint {
                latitude,
                longitude,
                city: place.address.city.or(place.address.town).or(place.address.village),
                state: place.address.state,
                display_name: place.display_name,
            }),
            _ => Err(ProcessingFailure::GeocodeUnresolved(query.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominatim_place_parses() {
        let json = r#"[{"lat": "30.2672", "lon": "-97.7431", "display_name": "Rusty Mic, Austin, Texas",
            "address": {"town": "Austin", "state": "Texas"}}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(json).unwrap();
        assert_eq!(places[0].address.town.as_deref(), Some("Austin"));
        assert_eq!(places[0].lat, "30.2672");
    }

    #[tokio::test]
    async fn test_empty_query_is_unresolved() {
        let geocoder = NominatimGeocoder::new(&GeocodeConfig::default(), &FetchConfig::default()).unwrap();
        assert!(matches!(
            geocoder.geocode("  ").await,
            Err(ProcessingFailure::GeocodeUnresolved(_))
        ));
    }
}
