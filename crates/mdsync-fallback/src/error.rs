//! Fallback error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Bad snapshot response: {0}")]
    BadResponse(String),
}

pub type FallbackResult<T> = Result<T, FallbackError>;
