use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::external::identity::TokenEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub notification_queue_size: usize,
    pub event_buffer_size: usize,
    pub geocoder_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub static_tokens: Option<String>,
    pub core: CoreSettings,
}

/// Knobs the engines read at request time. Passed in explicitly through
/// `AppState`; nothing here is global.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub frontend_url: String,
    pub geocoder_timeout: Duration,
    pub notifier_timeout: Duration,
    pub tracking_number_attempts: u32,
    pub commit_retries: u32,
    pub motion_speed_threshold_kmh: f64,
    pub recent_locations: usize,
    pub driver_history_limit: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            geocoder_timeout: Duration::from_millis(2_000),
            notifier_timeout: Duration::from_millis(5_000),
            tracking_number_attempts: 5,
            commit_retries: 3,
            motion_speed_threshold_kmh: 5.0,
            recent_locations: 10,
            driver_history_limit: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = CoreSettings::default();
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            notification_queue_size: parse_or_default("NOTIFICATION_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            geocoder_url: non_empty_var("GEOCODER_URL"),
            notify_webhook_url: non_empty_var("NOTIFY_WEBHOOK_URL"),
            static_tokens: non_empty_var("STATIC_TOKENS"),
            core: CoreSettings {
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
                geocoder_timeout: Duration::from_millis(parse_or_default(
                    "GEOCODER_TIMEOUT_MS",
                    2_000,
                )?),
                notifier_timeout: Duration::from_millis(parse_or_default(
                    "NOTIFIER_TIMEOUT_MS",
                    5_000,
                )?),
                tracking_number_attempts: parse_or_default(
                    "TRACKING_NUMBER_ATTEMPTS",
                    defaults.tracking_number_attempts,
                )?,
                commit_retries: parse_or_default("COMMIT_RETRIES", defaults.commit_retries)?,
                motion_speed_threshold_kmh: parse_or_default(
                    "MOTION_SPEED_THRESHOLD_KMH",
                    defaults.motion_speed_threshold_kmh,
                )?,
                recent_locations: parse_or_default("RECENT_LOCATIONS", defaults.recent_locations)?,
                driver_history_limit: parse_or_default(
                    "DRIVER_HISTORY_LIMIT",
                    defaults.driver_history_limit,
                )?,
            },
        })
    }

    /// Parses `STATIC_TOKENS`, a JSON array of `{token, user_id, ...}`.
    pub fn token_entries(&self) -> Result<Vec<TokenEntry>, AppError> {
        match &self.static_tokens {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|err| AppError::Internal(format!("invalid STATIC_TOKENS: {err}"))),
            None => Ok(Vec::new()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
