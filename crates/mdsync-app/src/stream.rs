//! Consumer facade for tracked position lists.
//!
//! One `PositionStream` per UI consumer: it owns a multiplexer
//! subscription per distinct instrument plus a visibility-aware
//! snapshot poller, and recomputes derived metrics whenever any source
//! changes. Callers only ever see `{data, totals, is_live, is_connected,
//! is_paused, is_fallback_mode, refresh}`, never raw protocol detail.

use mdsync_calendar::MarketCalendar;
use mdsync_core::{DataSource, Position, SubMode, SymbolKey, SymbolRef};
use mdsync_feed::{Multiplexer, QuoteListener, Subscription};
use mdsync_fallback::{
    select_source, PollerConfig, QuoteFetcher, SnapshotPoller,
};
use mdsync_metrics::{enhance_positions, EnhancedPosition, PortfolioTotals, ResolvedQuote};
use mdsync_scheduler::Visibility;
use mdsync_ws::ConnState;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-stream tuning, taken from the fallback config section.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub poll_interval_ms: u64,
    pub stale_threshold_ms: i64,
    pub fetch_when_hidden: bool,
}

/// How often derived metrics are re-evaluated without any source event,
/// so staleness expiry flips items off "live" even on a silent feed.
const REEVALUATE_INTERVAL_MS: u64 = 1000;

struct StreamState {
    baseline: Vec<Position>,
    calendar: Arc<MarketCalendar>,
    multiplexer: Arc<Multiplexer>,
    poller: Arc<SnapshotPoller>,
    state_rx: watch::Receiver<ConnState>,
    stale_threshold_ms: i64,
    enhanced: RwLock<Vec<EnhancedPosition>>,
    totals: RwLock<PortfolioTotals>,
    updates_tx: watch::Sender<u64>,
    recompute: Notify,
}

impl StreamState {
    /// Merge every source through the priority rule and refold metrics.
    fn recompute(&self) {
        let now = chrono::Utc::now();
        let (enhanced, totals) = enhance_positions(&self.baseline, |key: &SymbolKey| {
            let live = self.multiplexer.cached(&key.symbol, key.exchange);
            let snapshot = self.poller.snapshot(key).map(|e| e.fields);
            let open = self.calendar.is_exchange_open_at(key.exchange, now);
            let decision = select_source(
                live.as_ref(),
                snapshot.as_ref(),
                None,
                open,
                self.stale_threshold_ms,
                now,
            );
            ResolvedQuote {
                ltp: decision.ltp,
                source: decision.source,
            }
        });

        *self.enhanced.write() = enhanced;
        *self.totals.write() = totals;
        self.updates_tx.send_modify(|generation| *generation += 1);
    }
}

async fn stream_task(
    state: Arc<StreamState>,
    mut poller_changes: watch::Receiver<u64>,
    mut conn_rx: watch::Receiver<ConnState>,
    shutdown: CancellationToken,
) {
    let mut reevaluate =
        tokio::time::interval(Duration::from_millis(REEVALUATE_INTERVAL_MS));
    reevaluate.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("Position stream shutting down");
                return;
            }
            () = state.recompute.notified() => state.recompute(),
            res = poller_changes.changed() => {
                if res.is_err() {
                    return;
                }
                state.recompute();
            }
            res = conn_rx.changed() => {
                if res.is_err() {
                    return;
                }
                state.recompute();
            }
            _ = reevaluate.tick() => state.recompute(),
        }
    }
}

/// Live view over a tracked position list.
pub struct PositionStream {
    inner: Arc<StreamState>,
    /// Multiplexer disposers; dropping the stream releases every
    /// reference.
    _subs: Vec<Subscription>,
    shutdown: CancellationToken,
}

impl PositionStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start(
        positions: Vec<Position>,
        options: StreamOptions,
        calendar: Arc<MarketCalendar>,
        multiplexer: Arc<Multiplexer>,
        fetcher: Arc<dyn QuoteFetcher>,
        state_rx: watch::Receiver<ConnState>,
        visibility_rx: watch::Receiver<Visibility>,
        shutdown: CancellationToken,
    ) -> Self {
        // One subscription per distinct instrument, regardless of how
        // many positions share it.
        let mut seen = HashSet::new();
        let keys: Vec<SymbolKey> = positions
            .iter()
            .map(Position::key)
            .filter(|key| seen.insert(key.clone()))
            .collect();

        let poller = SnapshotPoller::new(
            fetcher,
            PollerConfig {
                interval_ms: options.poll_interval_ms,
                fetch_when_hidden: options.fetch_when_hidden,
            },
        );
        poller.set_symbols(keys.iter().map(SymbolRef::from).collect());
        tokio::spawn(poller.clone().run(visibility_rx, shutdown.clone()));

        let (updates_tx, _) = watch::channel(0);
        let state = Arc::new(StreamState {
            baseline: positions,
            calendar,
            multiplexer: multiplexer.clone(),
            poller: poller.clone(),
            state_rx,
            stale_threshold_ms: options.stale_threshold_ms,
            enhanced: RwLock::new(Vec::new()),
            totals: RwLock::new(PortfolioTotals::default()),
            updates_tx,
            recompute: Notify::new(),
        });

        let mut subs = Vec::with_capacity(keys.len());
        for key in &keys {
            let notify_state = state.clone();
            let listener: QuoteListener =
                Arc::new(move |_snap| notify_state.recompute.notify_one());
            subs.push(
                multiplexer
                    .subscribe(&key.symbol, key.exchange, SubMode::Quote, listener)
                    .await,
            );
        }

        tokio::spawn(stream_task(
            state.clone(),
            poller.changes(),
            state.state_rx.clone(),
            shutdown.clone(),
        ));

        // Baseline view before any source has reported.
        state.recompute();

        Self {
            inner: state,
            _subs: subs,
            shutdown,
        }
    }

    /// Current enhanced items.
    pub fn data(&self) -> Vec<EnhancedPosition> {
        self.inner.enhanced.read().clone()
    }

    /// Current portfolio aggregates.
    pub fn totals(&self) -> PortfolioTotals {
        self.inner.totals.read().clone()
    }

    /// True while the transport is authenticated and at least one item
    /// is priced from streamed data.
    pub fn is_live(&self) -> bool {
        self.is_connected()
            && self
                .inner
                .enhanced
                .read()
                .iter()
                .any(|item| item.source.is_live())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_rx.borrow().is_authenticated()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state_rx.borrow().is_paused()
    }

    /// True when displayed data comes entirely from the snapshot or
    /// baseline sources.
    pub fn is_fallback_mode(&self) -> bool {
        let items = self.inner.enhanced.read();
        !items.is_empty() && items.iter().all(|item| item.source != DataSource::Live)
    }

    /// Force an immediate batch snapshot fetch.
    pub fn refresh(&self) {
        self.inner.poller.refresh();
    }

    /// Bumped whenever the enhanced view changes.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.inner.updates_tx.subscribe()
    }
}

impl Drop for PositionStream {
    fn drop(&mut self) {
        // Stops the poller and the recompute task; the multiplexer
        // subscriptions release through `_subs`.
        self.shutdown.cancel();
    }
}
