//! Calendar data types.

use chrono::{DateTime, NaiveDate, Utc};
use mdsync_core::Exchange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authoritative trading window for one exchange on one day, already
/// resolved to absolute instants by the calendar backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTiming {
    pub exchange: Exchange,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MarketTiming {
    /// True when `now` falls inside the window (start inclusive,
    /// end exclusive).
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// A holiday record. Closes the listed exchanges unless a special
/// session overrides the closure for an explicit sub-window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub closed_exchanges: Vec<Exchange>,
    pub special_sessions: Vec<MarketTiming>,
}

impl Holiday {
    /// Whether this record closes the exchange for the full day.
    pub fn closes(&self, exchange: Exchange) -> bool {
        self.closed_exchanges.contains(&exchange)
    }

    /// Special session window for the exchange, if any.
    pub fn special_session(&self, exchange: Exchange) -> Option<&MarketTiming> {
        self.special_sessions.iter().find(|t| t.exchange == exchange)
    }
}

/// Classification of an exchange at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketPhase {
    Open,
    Closed,
    PreMarket,
    PostMarket,
}

impl MarketPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::PreMarket => write!(f, "pre-market"),
            Self::PostMarket => write!(f, "post-market"),
        }
    }
}
