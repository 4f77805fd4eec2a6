//! Write handle for queueing outbound feed requests.
//!
//! Channel-based, clonable, reconnect-safe: holders never touch the
//! socket directly, and sends are refused until the transport is
//! authenticated.

use crate::connection::ConnState;
use crate::message::FeedRequest;
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Error type for outbound sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport is not authenticated yet.
    NotAuthenticated,
    /// The outbound channel is closed (manager shut down).
    ChannelClosed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::ChannelClosed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Handle for sending requests over the feed transport.
#[derive(Clone)]
pub struct FeedWriteHandle {
    tx: mpsc::Sender<FeedRequest>,
    state_rx: watch::Receiver<ConnState>,
}

impl FeedWriteHandle {
    pub fn new(tx: mpsc::Sender<FeedRequest>, state_rx: watch::Receiver<ConnState>) -> Self {
        Self { tx, state_rx }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Whether requests would currently be accepted.
    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnState::Authenticated && !self.tx.is_closed()
    }

    /// Queue a request for sending.
    ///
    /// # Errors
    ///
    /// - `SendError::NotAuthenticated`: the transport is not authenticated
    /// - `SendError::ChannelClosed`: the manager has shut down
    pub async fn send(&self, request: FeedRequest) -> Result<(), SendError> {
        if !self.is_authenticated() {
            return Err(SendError::NotAuthenticated);
        }

        self.tx
            .send(request)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a request without waiting for channel capacity.
    ///
    /// Used from synchronous cleanup paths (subscription disposers)
    /// where an await is not possible. A full channel drops the request
    /// with a warning.
    pub fn try_send(&self, request: FeedRequest) -> Result<(), SendError> {
        if !self.is_authenticated() {
            return Err(SendError::NotAuthenticated);
        }

        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(req) => {
                warn!(?req, "Outbound channel full; dropping request");
                SendError::ChannelClosed
            }
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}
