use anyhow::{bail, Result};
use std::{path::PathBuf, sync::OnceLock, time::Duration};

use config::{Config, FileFormat};

pub fn get_config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();

    CONFIG.get_or_init(|| build_config().unwrap())
}

fn build_config() -> Result<Config> {
    Ok(defaults(Config::builder())?
        .add_source(config::Environment::with_prefix("TRACKER"))
        .add_source(config::File::new("tracker.toml", FileFormat::Toml).required(false))
        .build()?)
}

fn defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(builder
        .set_default("database_url", "sqlite://positions_log.db?mode=rwc")?
        .set_default("export_dir", ".")?
        .set_default(
            "telematics_base_url",
            "https://fleet.targatelematics.com/t2/api/followUnit/recentPositions",
        )?
        .set_default("fetch_mode", "recent")?
        .set_default("fetch_limit", 25)?
        .set_default("geocoder_url", "https://nominatim.openstreetmap.org/reverse")?
        .set_default("geocoder_user_agent", "tracker_app")?
        .set_default("geocoder_language", "it")?
        .set_default("geocoder_cooldown_ms", 1000)?
        .set_default("http_timeout_secs", 10)?
        .set_default("poll_interval_secs", 900)?
        .set_default("notify_cadence", 12)?
        .set_default("telegram_api_url", "https://api.telegram.org")?)
}

/// Which vendor endpoint shape the poll cycle consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchMode {
    /// Only the most recent position of each response.
    Latest,
    /// Every position of the recent-positions batch.
    Recent,
}

impl TryFrom<&str> for FetchMode {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "latest" => Ok(FetchMode::Latest),
            "recent" => Ok(FetchMode::Recent),
            other => bail!("Unknown fetch_mode '{}', expected 'latest' or 'recent'", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelematicsSettings {
    pub base_url: String,
    pub unit_id: String,
    pub token: String,
    pub auth_token: String,
    pub limit: u32,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct GeocoderSettings {
    pub url: String,
    pub user_agent: String,
    pub language: String,
    pub cooldown: Duration,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub api_url: String,
    pub token: String,
    pub chat_id: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub export_dir: PathBuf,
    pub fetch_mode: FetchMode,
    pub poll_interval: Duration,
    pub notify_cadence: u64,
    pub telematics: TelematicsSettings,
    pub geocoder: GeocoderSettings,
    pub telegram: TelegramSettings,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Settings> {
        let timeout = Duration::from_secs(config.get_int("http_timeout_secs")?.try_into()?);
        let notify_cadence: u64 = config.get_int("notify_cadence")?.try_into()?;
        if notify_cadence == 0 {
            bail!("notify_cadence must be at least 1");
        }
        let poll_interval = Duration::from_secs(config.get_int("poll_interval_secs")?.try_into()?);
        if poll_interval.is_zero() {
            bail!("poll_interval_secs must be at least 1");
        }

        Ok(Settings {
            database_url: config.get_string("database_url")?,
            export_dir: PathBuf::from(config.get_string("export_dir")?),
            fetch_mode: FetchMode::try_from(config.get_string("fetch_mode")?.as_str())?,
            poll_interval,
            notify_cadence,
            telematics: TelematicsSettings {
                base_url: config.get_string("telematics_base_url")?,
                unit_id: config.get_string("unit_id").unwrap_or_default(),
                token: config.get_string("telematics_token").unwrap_or_default(),
                auth_token: config.get_string("auth_token").unwrap_or_default(),
                limit: config.get_int("fetch_limit")?.try_into()?,
                timeout,
            },
            geocoder: GeocoderSettings {
                url: config.get_string("geocoder_url")?,
                user_agent: config.get_string("geocoder_user_agent")?,
                language: config.get_string("geocoder_language")?,
                cooldown: Duration::from_millis(
                    config.get_int("geocoder_cooldown_ms")?.try_into()?,
                ),
                timeout,
            },
            telegram: TelegramSettings {
                api_url: config.get_string("telegram_api_url")?,
                token: config.get_string("telegram_token").unwrap_or_default(),
                chat_id: config.get_string("telegram_chat_id").unwrap_or_default(),
                timeout,
            },
        })
    }
}
