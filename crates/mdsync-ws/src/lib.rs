//! Streaming connection manager for the market data feed.
//!
//! Provides robust connectivity with:
//! - Explicit connection lifecycle (connect, authenticate, disconnect, pause)
//! - Fresh credential fetch on every connect attempt
//! - Automatic reconnection with exponential backoff and jitter
//! - Authentication timeout forcing a clean reconnect
//! - Broadcast of state transitions to all interested components
//!
//! Exactly one transport exists per manager; `connect()` is idempotent
//! while an attempt is in flight.

pub mod connection;
pub mod credentials;
pub mod error;
pub mod message;
pub mod write_handle;

pub use connection::{ConnState, ConnectionConfig, ConnectionManager};
pub use credentials::{CredentialEndpoints, CredentialProvider, Credentials, HttpCredentialProvider};
pub use error::{WsError, WsResult};
pub use message::{FeedMessage, FeedRequest, TickPayload};
pub use write_handle::{FeedWriteHandle, SendError};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
