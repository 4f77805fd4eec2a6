//! Feed connection manager.
//!
//! Owns the single streaming transport, drives the
//! `Disconnected → Connecting → AwaitingAuth → Authenticated` state
//! machine, and handles automatic reconnection with exponential backoff.
//! A parallel `Paused` state is reachable from anywhere when the host
//! application backgrounds.

use crate::credentials::CredentialProvider;
use crate::error::{WsError, WsResult};
use crate::message::{FeedMessage, FeedRequest};
use crate::write_handle::FeedWriteHandle;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff. The observed production value
    /// is a fixed 3 s; here it seeds the exponential schedule.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// How long `AwaitingAuth` may last before a forced reconnect.
    pub auth_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 3000,
            reconnect_max_delay_ms: 60000,
            auth_timeout_ms: 10000,
        }
    }
}

/// Connection state, broadcast to all listeners in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authenticated,
    Paused,
}

impl ConnState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingAuth => write!(f, "awaiting-auth"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// What the owner wants the connection to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Up,
    Down,
    Paused,
}

/// Feed connection manager.
///
/// Exactly one transport exists per manager: the supervisor loop in
/// [`ConnectionManager::run`] is the only code path that opens a socket,
/// and `connect()` merely flips the desired state (idempotent while an
/// attempt is in flight).
pub struct ConnectionManager {
    config: ConnectionConfig,
    provider: Arc<dyn CredentialProvider>,
    state_tx: watch::Sender<ConnState>,
    desired_tx: watch::Sender<Desired>,
    message_tx: mpsc::Sender<FeedMessage>,
    /// Outbound request sender (cloned into write handles).
    outbound_tx: mpsc::Sender<FeedRequest>,
    /// Outbound request receiver (consumed by the session loop).
    outbound_rx: TokioMutex<mpsc::Receiver<FeedRequest>>,
    auto_reconnect: AtomicBool,
    last_error: RwLock<Option<String>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// Inbound `market_data`/`error` messages are forwarded to
    /// `message_tx`; auth responses are consumed internally.
    pub fn new(
        config: ConnectionConfig,
        provider: Arc<dyn CredentialProvider>,
        message_tx: mpsc::Sender<FeedMessage>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        let (desired_tx, _) = watch::channel(Desired::Down);
        Self {
            config,
            provider,
            state_tx,
            desired_tx,
            message_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            auto_reconnect: AtomicBool::new(true),
            last_error: RwLock::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a write handle for sending requests.
    ///
    /// The handle can be cloned and shared across tasks; sends are
    /// refused until the transport is authenticated.
    pub fn handle(&self) -> FeedWriteHandle {
        FeedWriteHandle::new(self.outbound_tx.clone(), self.state_tx.subscribe())
    }

    /// Subscribe to connection state transitions.
    pub fn state_rx(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    /// Request the connection to come up.
    ///
    /// No-op if already authenticated or an attempt is in flight: the
    /// supervisor loop owns the only transport.
    pub fn connect(&self) {
        self.desired_tx.send_if_modified(|d| {
            if *d != Desired::Up {
                *d = Desired::Up;
                true
            } else {
                false
            }
        });
    }

    /// User-initiated disconnect.
    ///
    /// Cancels any pending reconnect timer, closes the transport with a
    /// normal closure code, and parks in `Disconnected` without
    /// scheduling reconnection.
    pub fn disconnect(&self) {
        self.desired_tx.send_if_modified(|d| {
            if *d != Desired::Down {
                *d = Desired::Down;
                true
            } else {
                false
            }
        });
    }

    /// Pause on behalf of the visibility scheduler: closes the transport
    /// to save battery/bandwidth and suppresses reconnects.
    pub fn pause(&self) {
        self.desired_tx.send_if_modified(|d| {
            if *d != Desired::Paused {
                *d = Desired::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Leave `Paused` and re-run the connect cycle.
    pub fn resume(&self) {
        self.connect();
    }

    /// Enable or disable automatic reconnection after unclean closes.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Most recent connection/authentication error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Signal graceful shutdown; the supervisor loop exits promptly.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Supervisor loop. Spawn exactly once; reacts to
    /// `connect`/`disconnect`/`pause`/`resume` and drives reconnection.
    pub async fn run(&self) {
        let mut desired_rx = self.desired_tx.subscribe();
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                self.set_state(ConnState::Disconnected);
                return;
            }

            let desired = *desired_rx.borrow_and_update();
            match desired {
                Desired::Down => {
                    self.set_state(ConnState::Disconnected);
                    tokio::select! {
                        res = desired_rx.changed() => {
                            if res.is_err() {
                                return;
                            }
                        }
                        () = self.shutdown_token.cancelled() => {}
                    }
                    attempt = 0;
                    continue;
                }
                Desired::Paused => {
                    self.set_state(ConnState::Paused);
                    tokio::select! {
                        res = desired_rx.changed() => {
                            if res.is_err() {
                                return;
                            }
                        }
                        () = self.shutdown_token.cancelled() => {}
                    }
                    attempt = 0;
                    continue;
                }
                Desired::Up => {}
            }

            let result = self.run_session(&mut desired_rx).await;

            // Subscription wire state and the quote cache are
            // connection-scoped; the Disconnected broadcast tells the
            // multiplexer to clear them.
            let reached_auth = self.state().is_authenticated();
            self.set_state(ConnState::Disconnected);
            if reached_auth {
                attempt = 0;
            }

            if self.is_shutdown() {
                return;
            }
            if *desired_rx.borrow() != Desired::Up {
                // disconnect()/pause() closed the session; the loop top parks.
                continue;
            }

            match result {
                Ok(()) => continue,
                Err(e) => {
                    error!(error = %e, "Feed connection lost");
                    self.record_error(e.to_string());

                    if !self.auto_reconnect.load(Ordering::Relaxed) {
                        warn!("Auto-reconnect disabled; staying disconnected");
                        self.desired_tx.send_replace(Desired::Down);
                        continue;
                    }

                    attempt += 1;
                    if self.config.max_reconnect_attempts > 0
                        && attempt >= self.config.max_reconnect_attempts
                    {
                        error!(attempt, "Max reconnection attempts reached");
                        self.desired_tx.send_replace(Desired::Down);
                        continue;
                    }

                    let delay = backoff_delay(
                        attempt,
                        self.config.reconnect_base_delay_ms,
                        self.config.reconnect_max_delay_ms,
                    ) + Duration::from_millis(rand_jitter());
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

                    // Wait for the delay OR an explicit disconnect/pause
                    // (cancellation-aware backoff sleep).
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        res = desired_rx.changed() => {
                            if res.is_err() {
                                return;
                            }
                            attempt = 0;
                        }
                        () = self.shutdown_token.cancelled() => {}
                    }
                }
            }
        }
    }

    /// One transport session: credentials, socket, auth handshake,
    /// message pump. `Ok(())` means we closed on request; `Err` means
    /// the transport failed and reconnection should be considered.
    async fn run_session(&self, desired_rx: &mut watch::Receiver<Desired>) -> WsResult<()> {
        self.set_state(ConnState::Connecting);

        // Credentials are fetched fresh on every attempt; they may
        // rotate between reconnects.
        let creds = self.provider.fetch().await?;

        info!(url = %creds.ws_url, "Connecting to feed transport");
        let (ws_stream, _response) =
            connect_async_tls_with_config(&creds.ws_url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        // Authenticate immediately on transport open.
        let auth = serde_json::to_string(&FeedRequest::Authenticate {
            api_key: creds.api_key,
        })?;
        write.send(Message::Text(auth)).await?;
        self.set_state(ConnState::AwaitingAuth);

        let auth_deadline = tokio::time::sleep(Duration::from_millis(self.config.auth_timeout_ms));
        tokio::pin!(auth_deadline);
        // Settled on success or on a definitive rejection. A rejection
        // disarms the timer: the session idles in AwaitingAuth until a
        // full reconnect, it is never retried in place.
        let mut auth_pending = true;

        let mut outbound = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in feed loop");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                res = desired_rx.changed() => {
                    if res.is_err() || *desired_rx.borrow() != Desired::Up {
                        debug!("Closing feed transport on request");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                () = &mut auth_deadline, if auth_pending => {
                    warn!(
                        timeout_ms = self.config.auth_timeout_ms,
                        "Authentication timed out; forcing reconnect"
                    );
                    let _ = write.send(Message::Close(None)).await;
                    return Err(WsError::AuthTimeout);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<FeedMessage>(&text) {
                                Ok(FeedMessage::Auth { status }) => {
                                    auth_pending = false;
                                    if status == "success" {
                                        info!("Feed authentication succeeded");
                                        self.clear_error();
                                        self.set_state(ConnState::Authenticated);
                                    } else {
                                        error!(%status, "Feed authentication rejected");
                                        self.record_error(format!(
                                            "authentication rejected: {status}"
                                        ));
                                    }
                                }
                                Ok(FeedMessage::Error { message }) => {
                                    warn!(%message, "Feed reported an error");
                                    self.forward(FeedMessage::Error { message }).await;
                                }
                                Ok(data) => self.forward(data).await,
                                Err(e) => {
                                    // Malformed inbound: dropped per-message,
                                    // never crashes the handler.
                                    warn!(error = %e, "Dropping malformed feed message");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Feed closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "Feed read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Feed stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                req = outbound.recv() => {
                    if let Some(req) = req {
                        let text = serde_json::to_string(&req)?;
                        write.send(Message::Text(text)).await?;
                    }
                }
            }
        }
    }

    async fn forward(&self, msg: FeedMessage) {
        if self.message_tx.send(msg).await.is_err() {
            warn!("Feed message receiver dropped");
        }
    }

    fn set_state(&self, state: ConnState) {
        self.state_tx.send_if_modified(|s| {
            if *s != state {
                debug!(from = %s, to = %state, "Connection state transition");
                *s = state;
                true
            } else {
                false
            }
        });
    }

    fn record_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay)
}

/// Random jitter (0-1000ms) to spread reconnect storms.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}
