//! Calendar error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Bad calendar response: {0}")]
    BadResponse(String),
}

pub type CalendarResult<T> = Result<T, CalendarError>;
