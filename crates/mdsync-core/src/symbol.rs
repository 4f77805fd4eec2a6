//! Instrument identity: exchanges, symbol keys, and subscription modes.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// NSE equities.
    Nse,
    /// BSE equities.
    Bse,
    /// NSE futures and options.
    Nfo,
    /// Commodity derivatives.
    Mcx,
}

impl Exchange {
    /// All known exchanges, for calendar iteration.
    pub const ALL: [Exchange; 4] = [Exchange::Nse, Exchange::Bse, Exchange::Nfo, Exchange::Mcx];

    /// Wire form (uppercase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Bse => "BSE",
            Self::Nfo => "NFO",
            Self::Mcx => "MCX",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NSE" => Ok(Self::Nse),
            "BSE" => Ok(Self::Bse),
            "NFO" => Ok(Self::Nfo),
            "MCX" => Ok(Self::Mcx),
            other => Err(CoreError::UnknownExchange(other.to_string())),
        }
    }
}

/// Unique instrument identifier: exchange plus trading symbol.
///
/// Displayed as `EXCHANGE:SYMBOL` (e.g. `NSE:RELIANCE`), which is also
/// the cache key format used across the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolKey {
    pub exchange: Exchange,
    pub symbol: String,
}

impl SymbolKey {
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

impl FromStr for SymbolKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (exchange, symbol) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidSymbolKey(s.to_string()))?;
        if symbol.is_empty() {
            return Err(CoreError::InvalidSymbolKey(s.to_string()));
        }
        Ok(Self {
            exchange: exchange.parse()?,
            symbol: symbol.to_string(),
        })
    }
}

/// Wire-level symbol reference used in subscribe/unsubscribe and batch
/// snapshot requests: `{"symbol": "...", "exchange": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub symbol: String,
    pub exchange: Exchange,
}

impl SymbolRef {
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.exchange, self.symbol.clone())
    }
}

impl From<&SymbolKey> for SymbolRef {
    fn from(key: &SymbolKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            exchange: key.exchange,
        }
    }
}

/// Subscription depth for a streamed instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubMode {
    /// Last traded price only.
    Ltp,
    /// Full quote (OHLC, volume, change).
    Quote,
    /// Quote plus market depth.
    Depth,
}

impl fmt::Display for SubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ltp => write!(f, "ltp"),
            Self::Quote => write!(f, "quote"),
            Self::Depth => write!(f, "depth"),
        }
    }
}
