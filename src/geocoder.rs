//! Reverse geocoding against a Nominatim-compatible service.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{dto::Address, util::config::GeocoderSettings, util::none_if_empty};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoding request timed out")]
    Timeout,

    #[error("Geocoding request failed: {0}")]
    Http(String),

    #[error("Failed to parse geocoding response: {0}")]
    Json(String),
}

impl From<reqwest::Error> for GeocodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeocodeError::Timeout
        } else {
            GeocodeError::Http(e.to_string())
        }
    }
}

pub trait Geocoder: Send + Sync {
    /// Resolves a coordinate. `Ok(None)` means the service knows nothing about the spot.
    fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> impl Future<Output = Result<Option<Address>, GeocodeError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ReverseResult {
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    road: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    town: String,
    #[serde(default)]
    village: String,
    #[serde(default)]
    state: String,
}

impl From<NominatimAddress> for Address {
    fn from(address: NominatimAddress) -> Self {
        let locality = [&address.city, &address.town, &address.village]
            .into_iter()
            .find_map(|candidate| none_if_empty(candidate))
            .unwrap_or_default()
            .to_string();

        Address {
            street: address.road,
            locality,
            region: address.state,
        }
    }
}

pub struct NominatimClient {
    http: reqwest::Client,
    url: String,
    language: String,
}

impl NominatimClient {
    pub fn new(settings: &GeocoderSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(NominatimClient {
            http,
            url: settings.url.clone(),
            language: settings.language.clone(),
        })
    }
}

impl Geocoder for NominatimClient {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Address>, GeocodeError> {
        let lat = latitude.to_string();
        let lon = longitude.to_string();

        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("accept-language", self.language.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        debug!(latitude, longitude, "Geocoder responded");

        parse_reverse_result(&bytes)
    }
}

fn parse_reverse_result(bytes: &[u8]) -> Result<Option<Address>, GeocodeError> {
    let result: ReverseResult =
        serde_json::from_slice(bytes).map_err(|e| GeocodeError::Json(e.to_string()))?;

    Ok(result.address.map(Address::from))
}
