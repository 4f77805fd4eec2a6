//! Application configuration.

use crate::error::{AppError, AppResult};
use mdsync_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// REST endpoints the engine talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Anti-forgery token endpoint (required by the other credential calls).
    #[serde(default = "default_antiforgery_url")]
    pub antiforgery_url: String,
    /// Short-lived transport URL endpoint.
    #[serde(default = "default_transport_url")]
    pub transport_url: String,
    /// Streaming auth token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Multi-symbol batch quote endpoint.
    #[serde(default = "default_quotes_url")]
    pub quotes_url: String,
    /// Market timings endpoint.
    #[serde(default = "default_timings_url")]
    pub timings_url: String,
    /// Holiday table endpoint.
    #[serde(default = "default_holidays_url")]
    pub holidays_url: String,
}

fn default_antiforgery_url() -> String {
    "http://127.0.0.1:5000/api/auth/antiforgery".to_string()
}

fn default_transport_url() -> String {
    "http://127.0.0.1:5000/api/stream/config".to_string()
}

fn default_token_url() -> String {
    "http://127.0.0.1:5000/api/stream/token".to_string()
}

fn default_quotes_url() -> String {
    "http://127.0.0.1:5000/api/quotes/batch".to_string()
}

fn default_timings_url() -> String {
    "http://127.0.0.1:5000/api/calendar/timings".to_string()
}

fn default_holidays_url() -> String {
    "http://127.0.0.1:5000/api/calendar/holidays".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            antiforgery_url: default_antiforgery_url(),
            transport_url: default_transport_url(),
            token_url: default_token_url(),
            quotes_url: default_quotes_url(),
            timings_url: default_timings_url(),
            holidays_url: default_holidays_url(),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSettings {
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay (ms); doubles per attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// How long to wait for an auth response before reconnecting (ms).
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    3000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
        }
    }
}

impl From<WsSettings> for ConnectionConfig {
    fn from(cfg: WsSettings) -> Self {
        Self {
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.reconnect_max_delay_ms,
            auth_timeout_ms: cfg.auth_timeout_ms,
        }
    }
}

/// Staleness and batch snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    /// Batch snapshot poll interval (ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum age of a streamed tick before it stops being live (ms).
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: i64,
    /// Keep polling while the tab is hidden.
    #[serde(default)]
    pub fetch_when_hidden: bool,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_stale_threshold_ms() -> i64 {
    5000
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            fetch_when_hidden: false,
        }
    }
}

/// Calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarSettings {
    /// Pre-market buffer before the open (minutes).
    #[serde(default = "default_pre_open_buffer_mins")]
    pub pre_open_buffer_mins: i64,
}

fn default_pre_open_buffer_mins() -> i64 {
    15
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            pre_open_buffer_mins: default_pre_open_buffer_mins(),
        }
    }
}

/// Visibility scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Grace period after hiding before feed work pauses (ms).
    #[serde(default = "default_hide_grace_ms")]
    pub hide_grace_ms: u64,
}

fn default_hide_grace_ms() -> u64 {
    30_000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            hide_grace_ms: default_hide_grace_ms(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub websocket: WsSettings,
    #[serde(default)]
    pub fallback: FallbackSettings,
    #[serde(default)]
    pub calendar: CalendarSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Connect as soon as the engine starts.
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    /// Instruments the smoke binary watches, as `EXCHANGE:SYMBOL` keys.
    #[serde(default)]
    pub watchlist: Vec<String>,
}

fn default_auto_connect() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig::default(),
            websocket: WsSettings::default(),
            fallback: FallbackSettings::default(),
            calendar: CalendarSettings::default(),
            scheduler: SchedulerSettings::default(),
            auto_connect: default_auto_connect(),
            watchlist: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("MDSYNC_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.websocket.reconnect_base_delay_ms, 3000);
        assert_eq!(config.fallback.poll_interval_ms, 30_000);
        assert_eq!(config.fallback.stale_threshold_ms, 5000);
        assert_eq!(config.calendar.pre_open_buffer_mins, 15);
        assert_eq!(config.scheduler.hide_grace_ms, 30_000);
        assert!(config.auto_connect);
        assert!(config.watchlist.is_empty());
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
            auto_connect = false
            watchlist = ["NSE:RELIANCE", "NSE:INFY"]

            [websocket]
            reconnect_base_delay_ms = 500
            auth_timeout_ms = 2000

            [fallback]
            poll_interval_ms = 10000
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(!config.auto_connect);
        assert_eq!(config.watchlist.len(), 2);
        assert_eq!(config.websocket.reconnect_base_delay_ms, 500);
        assert_eq!(config.websocket.auth_timeout_ms, 2000);
        // Unspecified fields keep their defaults.
        assert_eq!(config.websocket.reconnect_max_delay_ms, 60_000);
        assert_eq!(config.fallback.poll_interval_ms, 10_000);
        assert_eq!(config.fallback.stale_threshold_ms, 5000);
    }

    #[test]
    fn test_ws_settings_into_connection_config() {
        let settings = WsSettings {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 8000,
            auth_timeout_ms: 4000,
        };
        let conn: ConnectionConfig = settings.into();
        assert_eq!(conn.max_reconnect_attempts, 5);
        assert_eq!(conn.reconnect_base_delay_ms, 1000);
        assert_eq!(conn.reconnect_max_delay_ms, 8000);
        assert_eq!(conn.auth_timeout_ms, 4000);
    }
}
