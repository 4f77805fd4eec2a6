//! Quote data structures with field-by-field merge semantics.
//!
//! Stream messages carry partial updates: an LTP-only tick must not wipe
//! out previously received OHLC fields. `QuoteFields::merge_from` therefore
//! only overwrites fields present in the incoming patch.

use crate::decimal::{Px, Qty};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One level of the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Px,
    pub qty: Qty,
    #[serde(default)]
    pub orders: u32,
}

/// Five-level market depth for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketDepth {
    #[serde(default)]
    pub bids: Vec<DepthLevel>,
    #[serde(default)]
    pub asks: Vec<DepthLevel>,
}

/// Partial quote data for an instrument.
///
/// Every field is optional because stream messages deliver only what
/// changed. Doubles as the wire shape of the `data` object in both the
/// stream protocol and the batch snapshot response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuoteFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltp: Option<Px>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Px>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Px>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Px>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<Px>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<MarketDepth>,
}

impl QuoteFields {
    /// Merge a partial update into this quote.
    ///
    /// Only fields present in `patch` overwrite; absent fields retain
    /// their prior values.
    pub fn merge_from(&mut self, patch: &QuoteFields) {
        if patch.ltp.is_some() {
            self.ltp = patch.ltp;
        }
        if patch.open.is_some() {
            self.open = patch.open;
        }
        if patch.high.is_some() {
            self.high = patch.high;
        }
        if patch.low.is_some() {
            self.low = patch.low;
        }
        if patch.close.is_some() {
            self.close = patch.close;
        }
        if patch.volume.is_some() {
            self.volume = patch.volume;
        }
        if patch.change.is_some() {
            self.change = patch.change;
        }
        if patch.change_percent.is_some() {
            self.change_percent = patch.change_percent;
        }
        if patch.depth.is_some() {
            self.depth = patch.depth.clone();
        }
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.ltp.is_none()
            && self.open.is_none()
            && self.high.is_none()
            && self.low.is_none()
            && self.close.is_none()
            && self.volume.is_none()
            && self.change.is_none()
            && self.change_percent.is_none()
            && self.depth.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: Decimal) -> Option<Px> {
        Some(Px::new(v))
    }

    #[test]
    fn test_merge_overwrites_present_fields() {
        let mut base = QuoteFields {
            ltp: px(dec!(100)),
            open: px(dec!(98)),
            ..Default::default()
        };
        let patch = QuoteFields {
            ltp: px(dec!(101)),
            ..Default::default()
        };

        base.merge_from(&patch);
        assert_eq!(base.ltp, px(dec!(101)));
    }

    #[test]
    fn test_merge_retains_absent_fields() {
        let mut base = QuoteFields {
            ltp: px(dec!(100)),
            open: px(dec!(98)),
            high: px(dec!(102)),
            volume: Some(dec!(5000)),
            ..Default::default()
        };
        let patch = QuoteFields {
            ltp: px(dec!(101)),
            ..Default::default()
        };

        base.merge_from(&patch);
        assert_eq!(base.open, px(dec!(98)));
        assert_eq!(base.high, px(dec!(102)));
        assert_eq!(base.volume, Some(dec!(5000)));
    }

    #[test]
    fn test_merge_fills_empty_base() {
        let mut base = QuoteFields::default();
        assert!(base.is_empty());

        let patch = QuoteFields {
            ltp: px(dec!(50)),
            change_percent: Some(dec!(1.5)),
            ..Default::default()
        };
        base.merge_from(&patch);

        assert!(!base.is_empty());
        assert_eq!(base.ltp, px(dec!(50)));
        assert_eq!(base.change_percent, Some(dec!(1.5)));
    }

    #[test]
    fn test_wire_shape_skips_absent_fields() {
        let fields = QuoteFields {
            ltp: px(dec!(100.5)),
            ..Default::default()
        };
        let json = serde_json::to_value(&fields).unwrap();

        assert_eq!(json["ltp"], serde_json::json!(100.5));
        assert!(json.get("open").is_none());
        assert!(json.get("depth").is_none());
    }

    #[test]
    fn test_wire_parse_partial_object() {
        let fields: QuoteFields =
            serde_json::from_str(r#"{"ltp": 99.9, "volume": 1200}"#).unwrap();
        assert_eq!(fields.ltp, px(dec!(99.9)));
        assert_eq!(fields.volume, Some(dec!(1200)));
        assert!(fields.open.is_none());
    }
}
