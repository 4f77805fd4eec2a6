//! Shared per-symbol quote cache.
//!
//! Mutated only by the multiplexer's message handler; read by any number
//! of consumers. Lifetime is connection-scoped: the cache is cleared
//! when the transport drops.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mdsync_core::{QuoteFields, SymbolKey};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Cached quote state for one instrument.
#[derive(Debug)]
pub struct QuoteEntry {
    /// Merged quote fields.
    pub fields: QuoteFields,
    /// Wall-clock time of the last accepted update. Monotonically
    /// non-decreasing per symbol.
    pub last_update: DateTime<Utc>,
    /// Monotonic receive time, for age calculations.
    recv_mono: Instant,
    /// Feed-provided event time (epoch ms) of the last accepted update.
    feed_ts: Option<i64>,
}

impl QuoteEntry {
    fn new() -> Self {
        Self {
            fields: QuoteFields::default(),
            last_update: Utc::now(),
            recv_mono: Instant::now(),
            feed_ts: None,
        }
    }

    /// Merge a partial update into the entry.
    ///
    /// Returns false when the patch carries a feed timestamp older than
    /// the stored one: a late partial update must not overwrite newer
    /// fields.
    pub fn apply(&mut self, patch: &QuoteFields, feed_ts: Option<i64>) -> bool {
        if let (Some(incoming), Some(current)) = (feed_ts, self.feed_ts) {
            if incoming < current {
                return false;
            }
        }

        self.fields.merge_from(patch);
        self.last_update = Utc::now();
        self.recv_mono = Instant::now();
        if feed_ts.is_some() {
            self.feed_ts = feed_ts;
        }
        true
    }

    /// Age of the entry in milliseconds (monotonic).
    pub fn age_ms(&self) -> i64 {
        self.recv_mono.elapsed().as_millis() as i64
    }
}

/// Point-in-time view of a cache entry handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub key: SymbolKey,
    pub fields: QuoteFields,
    pub last_update: DateTime<Utc>,
}

type CacheEntry = Arc<RwLock<QuoteEntry>>;

/// Shared quote cache keyed by symbol.
pub struct QuoteCache {
    entries: DashMap<SymbolKey, CacheEntry>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Merge a patch into the entry for `key`, creating it if needed.
    ///
    /// Returns the updated snapshot, or `None` when the patch was
    /// rejected as out of order.
    pub fn apply(
        &self,
        key: &SymbolKey,
        patch: &QuoteFields,
        feed_ts: Option<i64>,
    ) -> Option<QuoteSnapshot> {
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(QuoteEntry::new())))
            .clone();

        let mut guard = entry.write();
        if !guard.apply(patch, feed_ts) {
            debug!(symbol = %key, "Dropping out-of-order quote update");
            return None;
        }
        Some(QuoteSnapshot {
            key: key.clone(),
            fields: guard.fields.clone(),
            last_update: guard.last_update,
        })
    }

    /// Current snapshot for `key`, if cached.
    pub fn snapshot(&self, key: &SymbolKey) -> Option<QuoteSnapshot> {
        self.entries.get(key).map(|entry| {
            let guard = entry.read();
            QuoteSnapshot {
                key: key.clone(),
                fields: guard.fields.clone(),
                last_update: guard.last_update,
            }
        })
    }

    /// Monotonic age of the entry for `key` in milliseconds.
    pub fn age_ms(&self, key: &SymbolKey) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.read().age_ms())
    }

    /// Drop the entry for `key` (last subscriber went away).
    pub fn evict(&self, key: &SymbolKey) {
        self.entries.remove(key);
    }

    /// Drop everything (transport closed; entries are connection-scoped).
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}
