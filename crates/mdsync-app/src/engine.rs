//! Engine wiring.
//!
//! Builds and owns every service (calendar, connection manager,
//! multiplexer, visibility scheduler) as explicit constructor-injected
//! objects with a start/stop lifecycle. Nothing here is ambient global
//! state; consumers hold an `Arc<LiveDataEngine>`.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::stream::{PositionStream, StreamOptions};
use mdsync_calendar::{CalendarClient, MarketCalendar};
use mdsync_core::{Exchange, Position, SubMode};
use mdsync_feed::{Multiplexer, QuoteListener, QuoteSnapshot, Subscription};
use mdsync_fallback::SnapshotClient;
use mdsync_scheduler::{PauseTarget, SchedulerConfig, VisibilityScheduler};
use mdsync_ws::{
    ConnState, ConnectionManager, CredentialEndpoints, CredentialProvider, HttpCredentialProvider,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lets the scheduler suspend the connection without depending on the
/// transport crate.
struct ConnectionPauseTarget(Arc<ConnectionManager>);

impl PauseTarget for ConnectionPauseTarget {
    fn pause(&self) {
        self.0.pause();
    }

    fn resume(&self) {
        self.0.resume();
    }
}

/// The live market data synchronization engine.
pub struct LiveDataEngine {
    config: AppConfig,
    calendar: Arc<MarketCalendar>,
    connection: Arc<ConnectionManager>,
    multiplexer: Arc<Multiplexer>,
    scheduler: Arc<VisibilityScheduler>,
    snapshot_client: Arc<SnapshotClient>,
    shutdown: CancellationToken,
}

impl LiveDataEngine {
    /// Start the engine with the production credential flow.
    pub async fn start(config: AppConfig) -> AppResult<Arc<Self>> {
        let provider = Arc::new(HttpCredentialProvider::new(CredentialEndpoints {
            antiforgery_url: config.endpoints.antiforgery_url.clone(),
            transport_url: config.endpoints.transport_url.clone(),
            token_url: config.endpoints.token_url.clone(),
        })?);
        Self::start_with_provider(config, provider).await
    }

    /// Start the engine with an injected credential provider.
    pub async fn start_with_provider(
        config: AppConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> AppResult<Arc<Self>> {
        let shutdown = CancellationToken::new();

        // Calendar loads once per session and fails closed on error.
        let calendar_client = CalendarClient::new(
            &config.endpoints.timings_url,
            &config.endpoints.holidays_url,
        )?;
        let calendar = Arc::new(
            MarketCalendar::fetch(&calendar_client)
                .await
                .with_pre_open_buffer(chrono::Duration::minutes(
                    config.calendar.pre_open_buffer_mins,
                )),
        );

        let (message_tx, message_rx) = mpsc::channel(256);
        let connection = Arc::new(ConnectionManager::new(
            config.websocket.clone().into(),
            provider,
            message_tx,
        ));
        let multiplexer = Multiplexer::new(connection.handle());

        let scheduler = Arc::new(VisibilityScheduler::new(
            Arc::new(ConnectionPauseTarget(connection.clone())),
            SchedulerConfig {
                hide_grace_ms: config.scheduler.hide_grace_ms,
            },
        ));

        let snapshot_client = Arc::new(SnapshotClient::new(&config.endpoints.quotes_url)?);

        {
            let connection = connection.clone();
            tokio::spawn(async move { connection.run().await });
        }
        tokio::spawn(multiplexer.clone().run(
            message_rx,
            connection.state_rx(),
            shutdown.child_token(),
        ));

        if config.auto_connect {
            connection.connect();
        }

        info!(
            calendar_loaded = calendar.is_available(),
            auto_connect = config.auto_connect,
            "Live data engine started"
        );

        Ok(Arc::new(Self {
            config,
            calendar,
            connection,
            multiplexer,
            scheduler,
            snapshot_client,
            shutdown,
        }))
    }

    pub fn connection_state(&self) -> ConnState {
        self.connection.state()
    }

    pub fn state_rx(&self) -> watch::Receiver<ConnState> {
        self.connection.state_rx()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.state().is_authenticated()
    }

    pub fn is_paused(&self) -> bool {
        self.connection.state().is_paused()
    }

    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.connection.set_auto_reconnect(enabled);
    }

    /// Host shell callback for foreground/background transitions.
    pub fn set_visible(&self, visible: bool) {
        self.scheduler.set_visible(visible);
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Subscribe a listener to a single instrument's quotes.
    pub async fn watch_quotes(
        &self,
        symbol: &str,
        exchange: Exchange,
        mode: SubMode,
        listener: QuoteListener,
    ) -> Subscription {
        self.multiplexer
            .subscribe(symbol, exchange, mode, listener)
            .await
    }

    /// Cached snapshot for an instrument, if any.
    pub fn cached(&self, symbol: &str, exchange: Exchange) -> Option<QuoteSnapshot> {
        self.multiplexer.cached(symbol, exchange)
    }

    /// Track a list of positions: live quotes, staleness-aware fallback,
    /// and derived P&L, behind the consumer contract.
    pub async fn track_positions(&self, positions: Vec<Position>) -> PositionStream {
        PositionStream::start(
            positions,
            StreamOptions {
                poll_interval_ms: self.config.fallback.poll_interval_ms,
                stale_threshold_ms: self.config.fallback.stale_threshold_ms,
                fetch_when_hidden: self.config.fallback.fetch_when_hidden,
            },
            self.calendar.clone(),
            self.multiplexer.clone(),
            self.snapshot_client.clone(),
            self.connection.state_rx(),
            self.scheduler.visibility_rx(),
            self.shutdown.child_token(),
        )
        .await
    }

    /// Stop every component task and close the transport.
    pub fn shutdown(&self) {
        info!("Live data engine shutting down");
        self.shutdown.cancel();
        self.connection.shutdown();
    }
}
