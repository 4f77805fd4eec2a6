//! Reference-counted subscription multiplexer.
//!
//! N independent consumers watching the same `(symbol, mode)` share one
//! wire-level subscription: subscribe is sent on the 1st reference,
//! unsubscribe on the 0th dereference. Requests made before the
//! transport authenticates are flushed automatically on the next
//! `Authenticated` transition, which also covers resubscription after a
//! reconnect.
//!
//! Consumer registrations outlive the connection; the wire-subscription
//! set and the quote cache are connection-scoped and cleared on every
//! `Disconnected` transition.

use crate::cache::{QuoteCache, QuoteSnapshot};
use mdsync_core::{Exchange, SubMode, SymbolKey, SymbolRef};
use mdsync_ws::{ConnState, FeedMessage, FeedRequest, FeedWriteHandle, TickPayload};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback invoked with the merged snapshot after every accepted tick.
pub type QuoteListener = Arc<dyn Fn(&QuoteSnapshot) + Send + Sync>;

#[derive(Default)]
struct MuxState {
    /// Consumer reference counts per (symbol, mode).
    refcounts: HashMap<(SymbolKey, SubMode), usize>,
    /// Registered listeners per symbol.
    listeners: HashMap<SymbolKey, HashMap<Uuid, QuoteListener>>,
    /// Pairs subscribed on the current connection.
    wire_active: HashSet<(SymbolKey, SubMode)>,
}

/// Subscription multiplexer over one feed connection.
pub struct Multiplexer {
    cache: QuoteCache,
    state: Mutex<MuxState>,
    handle: FeedWriteHandle,
    /// Handed to subscriptions so disposers work after the multiplexer
    /// itself is gone.
    weak_self: Weak<Multiplexer>,
}

impl Multiplexer {
    pub fn new(handle: FeedWriteHandle) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            cache: QuoteCache::new(),
            state: Mutex::new(MuxState::default()),
            handle,
            weak_self: weak.clone(),
        })
    }

    /// Cached snapshot for an instrument, if any consumer has data.
    pub fn cached(&self, symbol: &str, exchange: Exchange) -> Option<QuoteSnapshot> {
        self.cache.snapshot(&SymbolKey::new(exchange, symbol))
    }

    /// Register a consumer for an instrument.
    ///
    /// The returned [`Subscription`] is the disposer: dropping it (or
    /// calling `unsubscribe()`) releases the reference. If a cached
    /// entry already exists the listener is invoked synchronously with
    /// it, so the consumer never renders an empty initial state.
    pub async fn subscribe(
        &self,
        symbol: &str,
        exchange: Exchange,
        mode: SubMode,
        listener: QuoteListener,
    ) -> Subscription {
        let key = SymbolKey::new(exchange, symbol);
        let id = Uuid::new_v4();

        let first_ref = {
            let mut state = self.state.lock();
            state
                .listeners
                .entry(key.clone())
                .or_default()
                .insert(id, listener.clone());
            let count = state.refcounts.entry((key.clone(), mode)).or_insert(0);
            *count += 1;
            *count == 1
        };

        if let Some(snap) = self.cache.snapshot(&key) {
            listener(&snap);
        }

        if first_ref {
            self.request_wire_subscribe(&key, mode).await;
        }

        debug!(symbol = %key, %mode, first_ref, "Subscription added");
        Subscription {
            mux: self.weak_self.clone(),
            id,
            key,
            mode,
            active: true,
        }
    }

    /// Demultiplexing loop: consumes inbound messages and reacts to
    /// connection state transitions. Spawn exactly once.
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<FeedMessage>,
        mut state_rx: watch::Receiver<ConnState>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Multiplexer shutting down");
                    return;
                }

                res = state_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    let state = *state_rx.borrow_and_update();
                    match state {
                        ConnState::Authenticated => self.flush_pending().await,
                        // Watch channels conflate rapid transitions, so a
                        // brief Disconnected can be observed as the state
                        // that followed it; all three mean the previous
                        // connection is gone.
                        ConnState::Disconnected
                        | ConnState::Connecting
                        | ConnState::Paused => self.clear_connection_state(),
                        ConnState::AwaitingAuth => {}
                    }
                }

                msg = messages.recv() => {
                    match msg {
                        Some(FeedMessage::MarketData { symbol, exchange, data }) => {
                            self.on_market_data(&symbol, exchange, &data);
                        }
                        Some(FeedMessage::Error { message }) => {
                            warn!(%message, "Feed error message received");
                        }
                        Some(FeedMessage::Auth { .. }) => {} // consumed upstream
                        None => {
                            debug!("Feed message channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Merge a tick into the cache and fan it out to listeners.
    fn on_market_data(&self, symbol: &str, exchange: Exchange, data: &TickPayload) {
        let key = SymbolKey::new(exchange, symbol);

        // Data can trail an unsubscribe; ignore instead of resurrecting
        // an evicted cache entry.
        if !self.state.lock().listeners.contains_key(&key) {
            debug!(symbol = %key, "Tick for unwatched symbol ignored");
            return;
        }

        let Some(snap) = self.cache.apply(&key, &data.fields, data.ts) else {
            return;
        };

        let listeners: Vec<QuoteListener> = self
            .state
            .lock()
            .listeners
            .get(&key)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener(&snap);
        }
    }

    /// Send wire subscribes for every registered pair not yet active on
    /// this connection. Runs on every `Authenticated` transition: the
    /// first one flushes requests queued while unauthenticated, later
    /// ones restore subscriptions after a reconnect.
    async fn flush_pending(&self) {
        let pending: Vec<(SymbolKey, SubMode)> = {
            let state = self.state.lock();
            state
                .refcounts
                .keys()
                .filter(|pair| !state.wire_active.contains(pair))
                .cloned()
                .collect()
        };

        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Flushing subscriptions after authentication");

        for (key, mode) in pending {
            let req = FeedRequest::subscribe_one(SymbolRef::from(&key), mode);
            match self.handle.send(req).await {
                Ok(()) => {
                    self.state.lock().wire_active.insert((key, mode));
                }
                Err(e) => {
                    // Connection dropped mid-flush; the next
                    // Authenticated transition retries everything.
                    debug!(error = %e, symbol = %key, "Subscription flush interrupted");
                    return;
                }
            }
        }
    }

    async fn request_wire_subscribe(&self, key: &SymbolKey, mode: SubMode) {
        if !self.handle.is_authenticated() {
            debug!(symbol = %key, %mode, "Not authenticated; subscribe deferred");
            return;
        }

        let req = FeedRequest::subscribe_one(SymbolRef::from(key), mode);
        match self.handle.send(req).await {
            Ok(()) => {
                self.state.lock().wire_active.insert((key.clone(), mode));
            }
            Err(e) => debug!(error = %e, symbol = %key, "Wire subscribe deferred"),
        }
    }

    /// Release one reference. The wire unsubscribe and cache eviction
    /// happen only on the 0th dereference; the count never goes
    /// negative because each disposer fires at most once.
    fn release(&self, id: Uuid, key: &SymbolKey, mode: SubMode) {
        let (last_ref, key_unused) = {
            let mut state = self.state.lock();

            if let Some(map) = state.listeners.get_mut(key) {
                map.remove(&id);
                if map.is_empty() {
                    state.listeners.remove(key);
                }
            }

            let last_ref = match state.refcounts.get_mut(&(key.clone(), mode)) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        state.refcounts.remove(&(key.clone(), mode));
                        state.wire_active.remove(&(key.clone(), mode));
                        true
                    } else {
                        false
                    }
                }
                _ => {
                    warn!(symbol = %key, %mode, "Unsubscribe without matching reference");
                    false
                }
            };

            let key_unused = !state.refcounts.keys().any(|(k, _)| k == key);
            (last_ref, key_unused)
        };

        if last_ref {
            if key_unused {
                // No other mode still watches this symbol.
                self.cache.evict(key);
            }
            let req = FeedRequest::unsubscribe_one(SymbolRef::from(key), mode);
            if let Err(e) = self.handle.try_send(req) {
                debug!(error = %e, symbol = %key, "Wire unsubscribe skipped");
            }
            debug!(symbol = %key, %mode, "Last reference dropped");
        }
    }

    fn clear_connection_state(&self) {
        self.cache.clear();
        self.state.lock().wire_active.clear();
        debug!("Connection-scoped feed state cleared");
    }

    #[cfg(test)]
    fn refcount(&self, key: &SymbolKey, mode: SubMode) -> usize {
        self.state
            .lock()
            .refcounts
            .get(&(key.clone(), mode))
            .copied()
            .unwrap_or(0)
    }
}

/// Disposer for one consumer registration.
///
/// Dropping the subscription releases the reference; `unsubscribe()` is
/// the explicit form.
pub struct Subscription {
    mux: Weak<Multiplexer>,
    id: Uuid,
    key: SymbolKey,
    mode: SubMode,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &SymbolKey {
        &self.key
    }

    pub fn mode(&self) -> SubMode {
        self.mode
    }

    /// Release the reference now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(mux) = self.mux.upgrade() {
            mux.release(self.id, &self.key, self.mode);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsync_core::{Px, QuoteFields};
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_mux(
        state: ConnState,
    ) -> (
        Arc<Multiplexer>,
        mpsc::Receiver<FeedRequest>,
        watch::Sender<ConnState>,
    ) {
        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(state);
        let handle = FeedWriteHandle::new(tx, state_rx);
        (Multiplexer::new(handle), rx, state_tx)
    }

    fn noop() -> QuoteListener {
        Arc::new(|_| {})
    }

    fn collector() -> (QuoteListener, Arc<PlMutex<Vec<QuoteSnapshot>>>) {
        let seen: Arc<PlMutex<Vec<QuoteSnapshot>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: QuoteListener = Arc::new(move |snap| sink.lock().push(snap.clone()));
        (listener, seen)
    }

    fn tick(ltp: rust_decimal::Decimal) -> TickPayload {
        TickPayload {
            fields: QuoteFields {
                ltp: Some(Px::new(ltp)),
                ..Default::default()
            },
            ts: None,
        }
    }

    #[tokio::test]
    async fn test_one_wire_subscribe_for_many_consumers() {
        let (mux, mut rx, _state) = test_mux(ConnState::Authenticated);

        let sub1 = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        let sub2 = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        let sub3 = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;

        // Exactly one wire subscribe for three consumers.
        match rx.try_recv().unwrap() {
            FeedRequest::Subscribe { symbols, mode } => {
                assert_eq!(symbols[0].symbol, "RELIANCE");
                assert_eq!(mode, SubMode::Quote);
            }
            other => panic!("expected Subscribe, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        drop(sub1);
        drop(sub2);
        assert!(rx.try_recv().is_err(), "unsubscribe only on 0th dereference");

        drop(sub3);
        match rx.try_recv().unwrap() {
            FeedRequest::Unsubscribe { symbols, .. } => {
                assert_eq!(symbols[0].symbol, "RELIANCE");
            }
            other => panic!("expected Unsubscribe, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refcount_tracks_subscribers() {
        let (mux, _rx, _state) = test_mux(ConnState::Authenticated);
        let key = SymbolKey::new(Exchange::Nse, "INFY");

        let sub1 = mux.subscribe("INFY", Exchange::Nse, SubMode::Ltp, noop()).await;
        let sub2 = mux.subscribe("INFY", Exchange::Nse, SubMode::Ltp, noop()).await;
        assert_eq!(mux.refcount(&key, SubMode::Ltp), 2);

        drop(sub1);
        assert_eq!(mux.refcount(&key, SubMode::Ltp), 1);
        drop(sub2);
        assert_eq!(mux.refcount(&key, SubMode::Ltp), 0);
    }

    #[tokio::test]
    async fn test_subscribe_deferred_until_authenticated() {
        let (mux, mut rx, state_tx) = test_mux(ConnState::Disconnected);

        let _sub = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        assert!(rx.try_recv().is_err(), "no wire traffic while unauthenticated");

        // Authentication succeeds: the queued subscription is flushed.
        state_tx.send_replace(ConnState::Authenticated);
        mux.flush_pending().await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            FeedRequest::Subscribe { .. }
        ));
    }

    #[tokio::test]
    async fn test_resubscribe_after_reconnect() {
        let (mux, mut rx, state_tx) = test_mux(ConnState::Authenticated);

        let _sub = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            FeedRequest::Subscribe { .. }
        ));

        // Transport drops: connection-scoped wire state is cleared.
        state_tx.send_replace(ConnState::Disconnected);
        mux.clear_connection_state();

        // Second authentication: the registration is re-sent automatically.
        state_tx.send_replace(ConnState::Authenticated);
        mux.flush_pending().await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            FeedRequest::Subscribe { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_loop_flushes_on_auth_transition() {
        let (mux, mut rx, state_tx) = test_mux(ConnState::Disconnected);
        let (_msg_tx, msg_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let runner = tokio::spawn(mux.clone().run(msg_rx, state_tx.subscribe(), shutdown.clone()));

        let _sub = mux
            .subscribe("TCS", Exchange::Nse, SubMode::Ltp, noop())
            .await;
        state_tx.send_replace(ConnState::Authenticated);

        let req = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("flush within timeout")
            .expect("channel open");
        assert!(matches!(req, FeedRequest::Subscribe { .. }));

        shutdown.cancel();
        let _ = runner.await;
    }

    #[tokio::test]
    async fn test_fan_out_and_field_merge() {
        let (mux, _rx, _state) = test_mux(ConnState::Authenticated);
        let (listener_a, seen_a) = collector();
        let (listener_b, seen_b) = collector();

        let _sub_a = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, listener_a)
            .await;
        let _sub_b = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, listener_b)
            .await;

        mux.on_market_data("RELIANCE", Exchange::Nse, &tick(dec!(2500)));

        let volume_only = TickPayload {
            fields: QuoteFields {
                volume: Some(dec!(9000)),
                ..Default::default()
            },
            ts: None,
        };
        mux.on_market_data("RELIANCE", Exchange::Nse, &volume_only);

        for seen in [&seen_a, &seen_b] {
            let snaps = seen.lock();
            assert_eq!(snaps.len(), 2);
            // Second snapshot keeps the earlier LTP and adds volume.
            assert_eq!(snaps[1].fields.ltp, Some(Px::new(dec!(2500))));
            assert_eq!(snaps[1].fields.volume, Some(dec!(9000)));
        }
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_cached_snapshot() {
        let (mux, _rx, _state) = test_mux(ConnState::Authenticated);

        let _sub_a = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        mux.on_market_data("RELIANCE", Exchange::Nse, &tick(dec!(2500)));

        // Late subscriber is handed the cached snapshot synchronously.
        let (listener, seen) = collector();
        let _sub_b = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, listener)
            .await;

        let snaps = seen.lock();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].fields.ltp, Some(Px::new(dec!(2500))));
    }

    #[tokio::test]
    async fn test_tick_for_unwatched_symbol_ignored() {
        let (mux, _rx, _state) = test_mux(ConnState::Authenticated);

        mux.on_market_data("RELIANCE", Exchange::Nse, &tick(dec!(2500)));
        assert!(mux.cached("RELIANCE", Exchange::Nse).is_none());
    }

    #[tokio::test]
    async fn test_eviction_waits_for_all_modes() {
        let (mux, _rx, _state) = test_mux(ConnState::Authenticated);

        let sub_quote = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Quote, noop())
            .await;
        let sub_ltp = mux
            .subscribe("RELIANCE", Exchange::Nse, SubMode::Ltp, noop())
            .await;
        mux.on_market_data("RELIANCE", Exchange::Nse, &tick(dec!(2500)));

        drop(sub_quote);
        // The LTP subscription still needs the cache entry.
        assert!(mux.cached("RELIANCE", Exchange::Nse).is_some());

        drop(sub_ltp);
        assert!(mux.cached("RELIANCE", Exchange::Nse).is_none());
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe() {
        let (mux, mut rx, _state) = test_mux(ConnState::Authenticated);

        let sub = mux
            .subscribe("INFY", Exchange::Nse, SubMode::Quote, noop())
            .await;
        let _ = rx.try_recv();

        sub.unsubscribe();
        assert!(matches!(
            rx.try_recv().unwrap(),
            FeedRequest::Unsubscribe { .. }
        ));
    }
}
