//! Visibility-aware snapshot polling loop.
//!
//! Fetches immediately on enable, then on a fixed interval. Ticks are
//! skipped while the tab is hidden (configurable), with one catch-up
//! fetch on returning to foreground after being hidden longer than the
//! interval. Fetches for the same consumer are coalesced by
//! construction (one task, `MissedTickBehavior::Skip`), and an in-flight
//! request is aborted when the symbol set changes under it.

use crate::error::FallbackResult;
use crate::snapshot::SnapshotClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mdsync_core::{QuoteFields, SymbolKey, SymbolRef};
use mdsync_scheduler::Visibility;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed fetch interval.
    pub interval_ms: u64,
    /// Keep fetching while the tab is hidden.
    pub fetch_when_hidden: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            fetch_when_hidden: false,
        }
    }
}

/// One fetched snapshot for an instrument.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub fields: QuoteFields,
    pub fetched_at: DateTime<Utc>,
}

/// Source of batch quotes, injected so tests can stub the network.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch_quotes(
        &self,
        symbols: &[SymbolRef],
    ) -> FallbackResult<Vec<(SymbolKey, QuoteFields)>>;
}

#[async_trait]
impl QuoteFetcher for SnapshotClient {
    async fn fetch_quotes(
        &self,
        symbols: &[SymbolRef],
    ) -> FallbackResult<Vec<(SymbolKey, QuoteFields)>> {
        SnapshotClient::fetch_quotes(self, symbols).await
    }
}

/// Periodic batch snapshot poller for one consumer.
pub struct SnapshotPoller {
    fetcher: Arc<dyn QuoteFetcher>,
    config: PollerConfig,
    symbols: RwLock<Vec<SymbolRef>>,
    snapshots: RwLock<HashMap<SymbolKey, SnapshotEntry>>,
    /// Bumped on every symbol-set change; in-flight results from an
    /// older generation are discarded.
    generation: AtomicU64,
    refresh: Notify,
    param_changed: Notify,
    changed_tx: watch::Sender<u64>,
}

impl SnapshotPoller {
    pub fn new(fetcher: Arc<dyn QuoteFetcher>, config: PollerConfig) -> Arc<Self> {
        let (changed_tx, _) = watch::channel(0);
        Arc::new(Self {
            fetcher,
            config,
            symbols: RwLock::new(Vec::new()),
            snapshots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            refresh: Notify::new(),
            param_changed: Notify::new(),
            changed_tx,
        })
    }

    /// Latest snapshot for an instrument, if fetched.
    pub fn snapshot(&self, key: &SymbolKey) -> Option<SnapshotEntry> {
        self.snapshots.read().get(key).cloned()
    }

    /// Subscribe to "snapshot data changed" notifications.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    /// Replace the tracked symbol set.
    ///
    /// Aborts any in-flight fetch (its results would describe the old
    /// parameters), drops the old data, and fetches the new set
    /// immediately.
    pub fn set_symbols(&self, symbols: Vec<SymbolRef>) {
        {
            let mut current = self.symbols.write();
            if *current == symbols {
                return;
            }
            *current = symbols;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshots.write().clear();
        self.param_changed.notify_waiters();
        self.refresh.notify_one();
    }

    /// Force an immediate fetch (the consumer's `refresh()`).
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Polling loop. Spawn exactly once per poller.
    pub async fn run(
        self: Arc<Self>,
        mut visibility: watch::Receiver<Visibility>,
        shutdown: CancellationToken,
    ) {
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut hidden_since: Option<Instant> = match *visibility.borrow() {
            Visibility::Hidden => Some(Instant::now()),
            Visibility::Visible => None,
        };

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Snapshot poller shutting down");
                    return;
                }

                _ = interval.tick() => {
                    if hidden_since.is_some() && !self.config.fetch_when_hidden {
                        debug!("Tab hidden; skipping snapshot tick");
                        continue;
                    }
                    self.fetch_guarded().await;
                }

                () = self.refresh.notified() => {
                    self.fetch_guarded().await;
                }

                res = visibility.changed() => {
                    if res.is_err() {
                        return;
                    }
                    let vis = *visibility.borrow_and_update();
                    match vis {
                        Visibility::Hidden => {
                            hidden_since = Some(Instant::now());
                        }
                        Visibility::Visible => {
                            if let Some(since) = hidden_since.take() {
                                // One catch-up fetch when ticks were skipped
                                // longer than the interval, so the display is
                                // not stale-by-definition on return.
                                if !self.config.fetch_when_hidden && since.elapsed() >= period {
                                    debug!("Catch-up snapshot fetch after returning to foreground");
                                    self.fetch_guarded().await;
                                    interval.reset();
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run one fetch, aborting it if the symbol set changes under it.
    async fn fetch_guarded(&self) {
        tokio::select! {
            () = self.param_changed.notified() => {
                debug!("Aborting in-flight snapshot fetch after parameter change");
                self.refresh.notify_one();
            }
            () = self.fetch_once() => {}
        }
    }

    async fn fetch_once(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let symbols = self.symbols.read().clone();
        if symbols.is_empty() {
            return;
        }

        match self.fetcher.fetch_quotes(&symbols).await {
            Ok(quotes) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    debug!("Discarding snapshot for superseded symbol set");
                    return;
                }
                let now = Utc::now();
                {
                    let mut map = self.snapshots.write();
                    for (key, fields) in quotes {
                        map.insert(key, SnapshotEntry { fields, fetched_at: now });
                    }
                }
                self.changed_tx.send_modify(|generation| *generation += 1);
            }
            Err(e) => {
                // Fallback must not throw: previously cached values stay.
                warn!(error = %e, "Batch snapshot fetch failed; keeping previous values");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FallbackError;
    use mdsync_core::{Exchange, Px};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;
    use tokio::time::timeout;

    struct StubFetcher {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    impl StubFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteFetcher for StubFetcher {
        async fn fetch_quotes(
            &self,
            symbols: &[SymbolRef],
        ) -> FallbackResult<Vec<(SymbolKey, QuoteFields)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FallbackError::HttpClient("stub failure".to_string()));
            }
            Ok(symbols
                .iter()
                .map(|s| {
                    (
                        s.key(),
                        QuoteFields {
                            ltp: Some(Px::new(dec!(100))),
                            ..Default::default()
                        },
                    )
                })
                .collect())
        }
    }

    fn symbols() -> Vec<SymbolRef> {
        vec![SymbolRef {
            symbol: "RELIANCE".to_string(),
            exchange: Exchange::Nse,
        }]
    }

    fn key() -> SymbolKey {
        SymbolKey::new(Exchange::Nse, "RELIANCE")
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(2), async {
            loop {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition within timeout");
    }

    fn visible() -> (watch::Sender<Visibility>, watch::Receiver<Visibility>) {
        watch::channel(Visibility::Visible)
    }

    #[tokio::test]
    async fn test_immediate_fetch_on_enable() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 60_000,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (_vis_tx, vis_rx) = visible();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        wait_for(|| poller.snapshot(&key()).is_some()).await;
        assert!(fetcher.calls() >= 1);

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_hidden_ticks_skipped() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 20,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (_vis_tx, vis_rx) = watch::channel(Visibility::Hidden);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        // set_symbols queued one refresh before the loop observed Hidden;
        // interval ticks themselves never fetch while hidden.
        assert!(fetcher.calls() <= 1);

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_catch_up_after_long_hide() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 30,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (vis_tx, vis_rx) = visible();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        wait_for(|| fetcher.calls() >= 1).await;

        vis_tx.send_replace(Visibility::Hidden);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = fetcher.calls();

        // Hidden longer than the interval: returning triggers a catch-up.
        vis_tx.send_replace(Visibility::Visible);
        wait_for(|| fetcher.calls() > before).await;

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_refresh_forces_fetch() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 60_000,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (_vis_tx, vis_rx) = visible();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        wait_for(|| fetcher.calls() >= 1).await;
        let before = fetcher.calls();

        poller.refresh();
        wait_for(|| fetcher.calls() > before).await;

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_values() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 60_000,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (_vis_tx, vis_rx) = visible();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        wait_for(|| poller.snapshot(&key()).is_some()).await;

        // Subsequent failing fetches leave the cached entry in place.
        fetcher.fail.store(true, Ordering::SeqCst);
        let before = fetcher.calls();
        poller.refresh();
        wait_for(|| fetcher.calls() > before).await;

        assert!(poller.snapshot(&key()).is_some());

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_symbol_change_drops_old_data() {
        let fetcher = StubFetcher::new();
        let poller = SnapshotPoller::new(
            fetcher.clone(),
            PollerConfig {
                interval_ms: 60_000,
                fetch_when_hidden: false,
            },
        );
        poller.set_symbols(symbols());

        let (_vis_tx, vis_rx) = visible();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(vis_rx, shutdown.clone()));

        wait_for(|| poller.snapshot(&key()).is_some()).await;

        let new_key = SymbolKey::new(Exchange::Nse, "INFY");
        poller.set_symbols(vec![SymbolRef {
            symbol: "INFY".to_string(),
            exchange: Exchange::Nse,
        }]);

        // Old data is gone immediately; the new set arrives shortly.
        assert!(poller.snapshot(&key()).is_none());
        wait_for(|| poller.snapshot(&new_key).is_some()).await;

        shutdown.cancel();
        let _ = task.await;
    }
}
