//! Position types consumed by the derived-metrics engine.

use crate::decimal::{Px, Qty};
use crate::symbol::{Exchange, SymbolKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which source produced the displayed price for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Streamed tick, fresh and within market hours.
    Live,
    /// Periodic batch snapshot.
    Snapshot,
    /// REST baseline captured when the item list was loaded.
    Baseline,
}

impl DataSource {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Baseline => write!(f, "baseline"),
        }
    }
}

/// A priceable holding as loaded from the portfolio REST baseline.
///
/// `quantity` of zero marks a closed position: its P&L is realized and
/// final, and must never be recomputed from a live price. Non-zero
/// quantity means an open position whose P&L tracks the current price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: Qty,
    pub average_price: Px,
    #[serde(default)]
    pub ltp: Option<Px>,
    #[serde(default)]
    pub pnl: Decimal,
    #[serde(default)]
    pub pnl_percent: Decimal,
    /// Intraday realized P&L already booked from partial closes.
    #[serde(default)]
    pub today_realized_pnl: Option<Decimal>,
}

impl Position {
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.exchange, self.symbol.clone())
    }

    /// Closed positions keep their baseline P&L forever.
    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }
}
