//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed connection error: {0}")]
    Ws(#[from] mdsync_ws::WsError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] mdsync_calendar::CalendarError),

    #[error("Fallback error: {0}")]
    Fallback(#[from] mdsync_fallback::FallbackError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdsync_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
