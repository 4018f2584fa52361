//! Minimal runtime configuration helpers.
//! Credentials are required; everything else has a sensible default.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

pub const DEFAULT_CACHE_DIR: &str = "sigen_cache";
pub const DEFAULT_DATA_DIR: &str = "sigen_data";
pub const DEFAULT_REALTIME_SECS: u64 = 60;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Regional API base, e.g. `https://api-aus.sigencloud.com`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// The system's installation date; collection walks forward from here.
    /// The API does not expose it, so it is supplied manually.
    pub install_date: Option<NaiveDate>,
    /// Directory for the per-day cache files.
    pub cache_dir: PathBuf,
    /// Directory for the monthly output files.
    pub data_dir: PathBuf,
    /// Allow skipping the historical collection on startup.
    pub collect_enabled: bool,
    /// Optional cap on history request rate.
    pub requests_per_second: Option<NonZeroU32>,
    /// Pause before retrying a transient history fetch failure.
    pub retry_backoff: Duration,
    /// Enable the realtime energy-flow watcher after collection.
    pub realtime_enabled: bool,
    /// Realtime polling cadence.
    pub realtime_interval: Duration,
}

fn required(name: &str) -> Result<String, String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("Missing required environment variable {}", name)),
    }
}

fn flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let base_url = required("SIGEN_BASE_URL")?;
        let username = required("SIGEN_USERNAME")?;
        let password = required("SIGEN_PASSWORD")?;

        let install_date = match std::env::var("SIGEN_INSTALL_DATE") {
            Ok(s) if !s.trim().is_empty() => Some(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_err(|_| "SIGEN_INSTALL_DATE must be in YYYY-MM-DD format".to_string())?,
            ),
            _ => None,
        };

        let cache_dir = std::env::var("SIGEN_CACHE_DIR").unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string());
        let data_dir = std::env::var("SIGEN_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());

        let requests_per_second = match std::env::var("COLLECT_REQUESTS_PER_SECOND") {
            Ok(s) if !s.trim().is_empty() => Some(
                s.trim()
                    .parse::<NonZeroU32>()
                    .map_err(|_| "COLLECT_REQUESTS_PER_SECOND must be a positive integer".to_string())?,
            ),
            _ => None,
        };

        let retry_backoff_secs = std::env::var("COLLECT_RETRY_BACKOFF_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_BACKOFF_SECS);

        let realtime_secs = std::env::var("REALTIME_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REALTIME_SECS);

        Ok(Config {
            base_url,
            username,
            password,
            install_date,
            cache_dir: PathBuf::from(cache_dir),
            data_dir: PathBuf::from(data_dir),
            collect_enabled: flag("COLLECT_ENABLED", true),
            requests_per_second,
            retry_backoff: Duration::from_secs(retry_backoff_secs),
            realtime_enabled: flag("REALTIME_ENABLED", false),
            realtime_interval: Duration::from_secs(realtime_secs),
        })
    }
}
