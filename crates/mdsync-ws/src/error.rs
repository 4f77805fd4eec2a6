//! Feed connection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Credential fetch failed: {0}")]
    CredentialFetch(String),

    #[error("Authentication rejected: {0}")]
    AuthFailed(String),

    #[error("Authentication timed out")]
    AuthTimeout,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
