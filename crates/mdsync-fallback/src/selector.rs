//! Source selection: which price is authoritative for an item.
//!
//! Strict priority, evaluated in order:
//! 1. Streamed data, iff the exchange is open, an LTP exists, and the
//!    last update is younger than the staleness threshold.
//! 2. Batch snapshot, iff it has an LTP.
//! 3. REST baseline.
//!
//! Pure function with an explicit `now` so the boundary is testable.

use chrono::{DateTime, Utc};
use mdsync_core::{DataSource, Px, QuoteFields};
use mdsync_feed::QuoteSnapshot;

/// Default maximum age of a streamed tick before it stops being "live".
pub const DEFAULT_STALE_THRESHOLD_MS: i64 = 5000;

/// Outcome of the priority rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceDecision {
    /// Authoritative price, `None` when even the baseline lacks one.
    pub ltp: Option<Px>,
    pub source: DataSource,
}

/// Apply the priority rule for one instrument.
pub fn select_source(
    live: Option<&QuoteSnapshot>,
    snapshot: Option<&QuoteFields>,
    baseline_ltp: Option<Px>,
    exchange_open: bool,
    stale_threshold_ms: i64,
    now: DateTime<Utc>,
) -> SourceDecision {
    if exchange_open {
        if let Some(snap) = live {
            if let Some(ltp) = snap.fields.ltp {
                let age_ms = (now - snap.last_update).num_milliseconds();
                if age_ms < stale_threshold_ms {
                    return SourceDecision {
                        ltp: Some(ltp),
                        source: DataSource::Live,
                    };
                }
            }
        }
    }

    if let Some(fields) = snapshot {
        if let Some(ltp) = fields.ltp {
            return SourceDecision {
                ltp: Some(ltp),
                source: DataSource::Snapshot,
            };
        }
    }

    SourceDecision {
        ltp: baseline_ltp,
        source: DataSource::Baseline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mdsync_core::{Exchange, SymbolKey};
    use rust_decimal_macros::dec;

    fn live_snapshot(ltp: Option<Px>, updated: DateTime<Utc>) -> QuoteSnapshot {
        QuoteSnapshot {
            key: SymbolKey::new(Exchange::Nse, "RELIANCE"),
            fields: QuoteFields {
                ltp,
                ..Default::default()
            },
            last_update: updated,
        }
    }

    fn snapshot_fields(ltp: Option<Px>) -> QuoteFields {
        QuoteFields {
            ltp,
            ..Default::default()
        }
    }

    #[test]
    fn test_live_wins_when_fresh_and_open() {
        let now = Utc::now();
        let live = live_snapshot(Some(Px::new(dec!(100))), now);
        let snap = snapshot_fields(Some(Px::new(dec!(99))));

        let decision = select_source(Some(&live), Some(&snap), None, true, 5000, now);
        assert_eq!(decision.source, DataSource::Live);
        assert_eq!(decision.ltp, Some(Px::new(dec!(100))));
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let live = live_snapshot(Some(Px::new(dec!(100))), now - Duration::milliseconds(4999));
        let snap = snapshot_fields(Some(Px::new(dec!(99))));

        // Market-open forced true: only age decides.
        let decision = select_source(Some(&live), Some(&snap), None, true, 5000, now);
        assert_eq!(decision.source, DataSource::Live);

        let live = live_snapshot(Some(Px::new(dec!(100))), now - Duration::milliseconds(5001));
        let decision = select_source(Some(&live), Some(&snap), None, true, 5000, now);
        assert_eq!(decision.source, DataSource::Snapshot);
        assert_eq!(decision.ltp, Some(Px::new(dec!(99))));
    }

    #[test]
    fn test_closed_exchange_skips_live() {
        let now = Utc::now();
        let live = live_snapshot(Some(Px::new(dec!(100))), now);
        let snap = snapshot_fields(Some(Px::new(dec!(99))));

        let decision = select_source(Some(&live), Some(&snap), None, false, 5000, now);
        assert_eq!(decision.source, DataSource::Snapshot);
    }

    #[test]
    fn test_live_without_ltp_falls_through() {
        let now = Utc::now();
        let live = live_snapshot(None, now);
        let snap = snapshot_fields(Some(Px::new(dec!(99))));

        let decision = select_source(Some(&live), Some(&snap), None, true, 5000, now);
        assert_eq!(decision.source, DataSource::Snapshot);
    }

    #[test]
    fn test_baseline_is_last_resort() {
        let now = Utc::now();
        let snap = snapshot_fields(None);

        let decision = select_source(
            None,
            Some(&snap),
            Some(Px::new(dec!(98))),
            true,
            5000,
            now,
        );
        assert_eq!(decision.source, DataSource::Baseline);
        assert_eq!(decision.ltp, Some(Px::new(dec!(98))));
    }

    #[test]
    fn test_nothing_available() {
        let decision = select_source(None, None, None, true, 5000, Utc::now());
        assert_eq!(decision.source, DataSource::Baseline);
        assert_eq!(decision.ltp, None);
    }
}
