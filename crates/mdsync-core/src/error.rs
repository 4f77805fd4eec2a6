//! Error types for mdsync-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Invalid symbol key: {0}")]
    InvalidSymbolKey(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
