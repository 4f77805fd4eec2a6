//! Market calendar service.
//!
//! Loads today's timings and the holiday table once per session and
//! answers open/closed/classification queries. All queries have `_at`
//! variants taking an explicit instant so tests stay deterministic.

use crate::client::CalendarClient;
use crate::types::{Holiday, MarketPhase, MarketTiming};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mdsync_core::Exchange;
use std::collections::HashMap;
use tracing::{info, warn};

/// Pre-market buffer before the open (minutes).
const DEFAULT_PRE_OPEN_BUFFER_MINS: i64 = 15;

/// Resolved trading calendar for the current session.
///
/// When the backend fetch fails the calendar is constructed in the
/// fail-closed state: every exchange reports closed, so the UI never
/// shows a false "live" badge.
pub struct MarketCalendar {
    timings: HashMap<Exchange, MarketTiming>,
    holidays: HashMap<NaiveDate, Holiday>,
    pre_open_buffer: Duration,
    /// False when the backend fetch failed; all queries fail closed.
    available: bool,
}

impl MarketCalendar {
    /// Load the calendar from the backend. Any fetch error yields the
    /// fail-closed calendar.
    pub async fn fetch(client: &CalendarClient) -> Self {
        let timings = match client.fetch_timings().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Market timings fetch failed; calendar fails closed");
                return Self::closed();
            }
        };
        let holidays = match client.fetch_holidays().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "Holiday fetch failed; calendar fails closed");
                return Self::closed();
            }
        };

        info!(
            timings = timings.len(),
            holidays = holidays.len(),
            "Market calendar loaded"
        );
        Self::from_parts(timings, holidays)
    }

    /// Build a calendar from already-resolved data.
    pub fn from_parts(timings: Vec<MarketTiming>, holidays: Vec<Holiday>) -> Self {
        Self {
            timings: timings.into_iter().map(|t| (t.exchange, t)).collect(),
            holidays: holidays.into_iter().map(|h| (h.date, h)).collect(),
            pre_open_buffer: Duration::minutes(DEFAULT_PRE_OPEN_BUFFER_MINS),
            available: true,
        }
    }

    /// Fail-closed calendar: every exchange reports closed.
    pub fn closed() -> Self {
        Self {
            timings: HashMap::new(),
            holidays: HashMap::new(),
            pre_open_buffer: Duration::minutes(DEFAULT_PRE_OPEN_BUFFER_MINS),
            available: false,
        }
    }

    /// Override the pre-market buffer.
    pub fn with_pre_open_buffer(mut self, buffer: Duration) -> Self {
        self.pre_open_buffer = buffer;
        self
    }

    /// Whether calendar data loaded successfully this session.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_exchange_open(&self, exchange: Exchange) -> bool {
        self.is_exchange_open_at(exchange, Utc::now())
    }

    pub fn is_exchange_open_at(&self, exchange: Exchange, now: DateTime<Utc>) -> bool {
        self.effective_window_at(exchange, now)
            .map(|w| w.contains(now))
            .unwrap_or(false)
    }

    pub fn is_any_exchange_open(&self) -> bool {
        self.is_any_exchange_open_at(Utc::now())
    }

    pub fn is_any_exchange_open_at(&self, now: DateTime<Utc>) -> bool {
        Exchange::ALL
            .iter()
            .any(|&ex| self.is_exchange_open_at(ex, now))
    }

    pub fn classify(&self, exchange: Exchange) -> MarketPhase {
        self.classify_at(exchange, Utc::now())
    }

    /// Classify the exchange at an instant.
    ///
    /// `PreMarket` covers the configured buffer before the effective
    /// open, `PostMarket` anything after the effective close on a day
    /// the exchange trades at all.
    pub fn classify_at(&self, exchange: Exchange, now: DateTime<Utc>) -> MarketPhase {
        let Some(window) = self.effective_window_at(exchange, now) else {
            return MarketPhase::Closed;
        };

        if window.contains(now) {
            MarketPhase::Open
        } else if now < window.start && now >= window.start - self.pre_open_buffer {
            MarketPhase::PreMarket
        } else if now >= window.end {
            MarketPhase::PostMarket
        } else {
            MarketPhase::Closed
        }
    }

    /// The trading window that applies to `exchange` on the day of
    /// `now`: the special session on a holiday that closes it, the
    /// regular timing otherwise, `None` when fully closed.
    fn effective_window_at(&self, exchange: Exchange, now: DateTime<Utc>) -> Option<&MarketTiming> {
        if !self.available {
            return None;
        }

        if let Some(holiday) = self.holidays.get(&now.date_naive()) {
            if holiday.closes(exchange) {
                // Open only inside an explicit special session, closed otherwise.
                return holiday.special_session(exchange);
            }
        }

        self.timings.get(&exchange)
    }
}
