//! Delivery of export bundles to a Telegram chat.

use std::future::Future;

use chrono::{DateTime, Local};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::{export::ExportBundle, util::config::TelegramSettings};

const CONNECTION_TEST_TEXT: &str = "🔍 Test di connessione Telegram\n\
    Se ricevi questo messaggio, la connessione funziona correttamente!";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Telegram request failed: {0}")]
    Http(String),

    #[error("Telegram API error: {0}")]
    Api(String),

    #[error("Nothing to send: {0}")]
    Export(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Http(e.to_string())
    }
}

/// Consumer of export bundles. Reports success or failure only.
pub trait NotifySink: Send + Sync {
    fn send_bulk_export(
        &self,
        bundle: &ExportBundle,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

pub struct TelegramSink {
    http: reqwest::Client,
    settings: TelegramSettings,
}

pub fn caption(now: DateTime<Local>) -> String {
    format!(
        "📊 Aggiornamento posizioni - {}",
        now.format("%d/%m/%Y %H:%M:%S")
    )
}

impl TelegramSink {
    pub fn new(settings: TelegramSettings) -> anyhow::Result<Self> {
        if settings.token.is_empty() || settings.chat_id.is_empty() {
            anyhow::bail!("telegram_token and telegram_chat_id must be configured");
        }

        let http = reqwest::Client::builder().timeout(settings.timeout).build()?;

        Ok(TelegramSink { http, settings })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.token,
            method
        )
    }

    async fn read_response(response: reqwest::Response) -> Result<ApiResponse, SinkError> {
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(api),
            Some(api) => Err(SinkError::Api(
                api.description
                    .unwrap_or_else(|| format!("status {}", status.as_u16())),
            )),
            None => Err(SinkError::Api(format!("status {}: {}", status.as_u16(), body))),
        }
    }

    /// Fetches the chat metadata and posts a test message.
    pub async fn check_connection(&self) -> Result<(), SinkError> {
        let response = self
            .http
            .post(self.method_url("getChat"))
            .json(&json!({ "chat_id": self.settings.chat_id }))
            .send()
            .await?;
        let chat = Self::read_response(response).await?.result.unwrap_or_default();

        info!(
            chat_type = chat.get("type").and_then(|v| v.as_str()).unwrap_or_default(),
            title = chat.get("title").and_then(|v| v.as_str()).unwrap_or_default(),
            username = chat.get("username").and_then(|v| v.as_str()).unwrap_or_default(),
            "Telegram chat found"
        );

        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": self.settings.chat_id,
                "text": CONNECTION_TEST_TEXT
            }))
            .send()
            .await?;
        Self::read_response(response).await?;

        info!("Telegram connection test succeeded");
        Ok(())
    }
}

fn media_group(bundle: &ExportBundle, caption: &str) -> Result<(Form, usize), SinkError> {
    if bundle.artifacts.is_empty() {
        return Err(SinkError::Export("empty bundle".into()));
    }

    let media: Vec<serde_json::Value> = bundle
        .artifacts
        .iter()
        .enumerate()
        .map(|(index, artifact)| {
            let mut item = json!({
                "type": "document",
                "media": format!("attach://{}", artifact.file_name),
            });
            if index == 0 {
                item["caption"] = json!(caption);
            }
            item
        })
        .collect();

    let mut form = Form::new().text("media", serde_json::Value::from(media).to_string());
    for artifact in &bundle.artifacts {
        let part = Part::bytes(artifact.content.clone())
            .file_name(artifact.file_name)
            .mime_str(artifact.mime_type)?;
        form = form.part(artifact.file_name, part);
    }

    Ok((form, bundle.artifacts.len()))
}

impl NotifySink for TelegramSink {
    async fn send_bulk_export(&self, bundle: &ExportBundle) -> Result<(), SinkError> {
        let (form, count) = media_group(bundle, &caption(Local::now()))?;
        let form = form.text("chat_id", self.settings.chat_id.clone());

        let response = self
            .http
            .post(self.method_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await?;
        Self::read_response(response).await?;

        info!("Sent {} files to Telegram in one message", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn settings(token: &str) -> TelegramSettings {
        TelegramSettings {
            api_url: "https://api.telegram.org/".into(),
            token: token.into(),
            chat_id: "-100123".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn caption_uses_italian_date_format() {
        let now = Local.with_ymd_and_hms(2024, 10, 18, 9, 5, 7).unwrap();
        assert_eq!(caption(now), "📊 Aggiornamento posizioni - 18/10/2024 09:05:07");
    }

    #[test]
    fn method_urls_embed_the_bot_token() {
        let sink = TelegramSink::new(settings("123:abc")).unwrap();
        assert_eq!(
            sink.method_url("sendMediaGroup"),
            "https://api.telegram.org/bot123:abc/sendMediaGroup"
        );
    }

    #[test]
    fn sink_requires_credentials() {
        assert!(TelegramSink::new(settings("")).is_err());
    }

    #[test]
    fn empty_bundle_is_not_sent() {
        let bundle = ExportBundle { artifacts: vec![] };
        assert!(matches!(
            media_group(&bundle, "caption"),
            Err(SinkError::Export(_))
        ));
    }
}
