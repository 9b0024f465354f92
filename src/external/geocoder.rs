use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::external::UpstreamError;
use crate::models::driver::GeoPoint;

const USER_AGENT: &str = "parcel-tracker";

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, point: GeoPoint) -> Result<String, UpstreamError>;
}

/// Used when no geocoding endpoint is configured; every lookup falls back.
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn reverse(&self, _point: GeoPoint) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unavailable("geocoder".to_string()))
    }
}

/// Reverse geocoding against a Nominatim-compatible `/reverse` endpoint.
#[derive(Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn reverse_url(&self) -> String {
        format!("{}/reverse", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, point: GeoPoint) -> Result<String, UpstreamError> {
        let lat = point.lat.to_string();
        let lng = point.lng.to_string();

        let response = self
            .client
            .get(self.reverse_url())
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lng.as_str()),
                ("accept-language", "en"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        let body: ReverseResponse = response.json().await?;
        body.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(UpstreamError::NoResult)
    }
}
