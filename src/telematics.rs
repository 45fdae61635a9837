//! Vendor telematics API client.

use std::future::Future;

use chrono::Utc;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::{
    dto::{PositionsResponse, VendorPosition},
    util::config::TelematicsSettings,
};

#[derive(Debug, Error)]
pub enum TelematicsError {
    /// The vendor rejected the credentials. Not retried until the next tick.
    #[error("Telematics credentials rejected (401), refresh the authorization token")]
    Unauthorized,

    #[error("Telematics request failed: {0}")]
    Http(String),

    #[error("Telematics API returned status {0}")]
    Status(u16),

    #[error("Failed to parse telematics response: {0}")]
    Json(String),
}

/// Source of vehicle positions.
pub trait TelematicsSource: Send + Sync {
    /// Fetches the recent positions of the configured unit, in vendor order.
    fn fetch_recent(
        &self,
    ) -> impl Future<Output = Result<Vec<VendorPosition>, TelematicsError>> + Send;
}

pub struct TargaClient {
    http: reqwest::Client,
    settings: TelematicsSettings,
}

impl TargaClient {
    pub fn new(settings: TelematicsSettings) -> anyhow::Result<Self> {
        let credentials = [&settings.unit_id, &settings.token, &settings.auth_token];
        if credentials.iter().any(|value| value.is_empty()) {
            anyhow::bail!("unit_id, telematics_token and auth_token must be configured");
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent("Mozilla/5.0")
            .build()?;

        Ok(TargaClient { http, settings })
    }

    fn url(&self) -> String {
        format!(
            "{}/{}/{}/30",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.unit_id,
            self.settings.token
        )
    }
}

impl TelematicsSource for TargaClient {
    async fn fetch_recent(&self) -> Result<Vec<VendorPosition>, TelematicsError> {
        let cache_buster = Utc::now().timestamp_millis().to_string();
        let limit = self.settings.limit.to_string();

        let response = self
            .http
            .get(self.url())
            .header(reqwest::header::AUTHORIZATION, &self.settings.auth_token)
            .header(reqwest::header::ACCEPT, "*/*")
            .header("X-Requested-With", "XMLHttpRequest")
            .query(&[
                ("advanced", "false"),
                ("_dc", cache_buster.as_str()),
                ("page", "1"),
                ("start", "0"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TelematicsError::Http(e.to_string()))?;

        debug!(status = response.status().as_u16(), "Telematics response");

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(TelematicsError::Unauthorized),
            status if !status.is_success() => return Err(TelematicsError::Status(status.as_u16())),
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TelematicsError::Http(e.to_string()))?;

        parse_positions(&bytes)
    }
}

fn parse_positions(bytes: &[u8]) -> Result<Vec<VendorPosition>, TelematicsError> {
    let response: PositionsResponse =
        serde_json::from_slice(bytes).map_err(|e| TelematicsError::Json(e.to_string()))?;

    Ok(response.data.positions)
}

/// The most recent position of a batch, by parsed timestamp.
pub fn latest_position(positions: Vec<VendorPosition>) -> Option<VendorPosition> {
    positions.into_iter().max_by(|a, b| {
        let a_instant = crate::dto::parse_timestamp(&a.timestamp);
        let b_instant = crate::dto::parse_timestamp(&b.timestamp);
        a_instant
            .cmp(&b_instant)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    })
}
