//! Wire protocol messages for the data feed.
//!
//! Outbound and inbound messages are JSON objects discriminated by
//! `action` and `type` respectively:
//! - outbound: `{"action": "authenticate", ...}`, `{"action": "subscribe", ...}`
//! - inbound: `{"type": "auth", ...}`, `{"type": "market_data", ...}`, `{"type": "error", ...}`

use mdsync_core::{Exchange, QuoteFields, SubMode, SymbolRef};
use serde::{Deserialize, Serialize};

/// Outgoing request to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FeedRequest {
    /// Authenticate the transport with a freshly fetched token.
    Authenticate { api_key: String },
    /// Subscribe the listed instruments at the given mode.
    Subscribe {
        symbols: Vec<SymbolRef>,
        mode: SubMode,
    },
    /// Unsubscribe the listed instruments at the given mode.
    Unsubscribe {
        symbols: Vec<SymbolRef>,
        mode: SubMode,
    },
}

impl FeedRequest {
    /// Single-instrument subscribe helper.
    pub fn subscribe_one(sref: SymbolRef, mode: SubMode) -> Self {
        Self::Subscribe {
            symbols: vec![sref],
            mode,
        }
    }

    /// Single-instrument unsubscribe helper.
    pub fn unsubscribe_one(sref: SymbolRef, mode: SubMode) -> Self {
        Self::Unsubscribe {
            symbols: vec![sref],
            mode,
        }
    }
}

/// Tick payload carried by a `market_data` message.
///
/// Quote fields are flattened into the `data` object; `ts` is the
/// feed-provided event time (epoch ms) used for out-of-order rejection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickPayload {
    #[serde(flatten)]
    pub fields: QuoteFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

/// Incoming message from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Authentication result. `status` is `"success"` on acceptance;
    /// anything else is a rejection.
    Auth { status: String },
    /// A (possibly partial) quote update for one instrument.
    MarketData {
        symbol: String,
        exchange: Exchange,
        data: TickPayload,
    },
    /// Server-side error notification.
    Error { message: String },
}

impl FeedMessage {
    pub fn is_auth_success(&self) -> bool {
        matches!(self, Self::Auth { status } if status == "success")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authenticate_serialization() {
        let req = FeedRequest::Authenticate {
            api_key: "tok_abc".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"action": "authenticate", "api_key": "tok_abc"})
        );
    }

    #[test]
    fn test_subscribe_serialization() {
        let req = FeedRequest::subscribe_one(
            SymbolRef {
                symbol: "RELIANCE".to_string(),
                exchange: Exchange::Nse,
            },
            SubMode::Quote,
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], "subscribe");
        assert_eq!(value["mode"], "quote");
        assert_eq!(value["symbols"][0]["symbol"], "RELIANCE");
        assert_eq!(value["symbols"][0]["exchange"], "NSE");
    }

    #[test]
    fn test_unsubscribe_serialization() {
        let req = FeedRequest::unsubscribe_one(
            SymbolRef {
                symbol: "INFY".to_string(),
                exchange: Exchange::Nse,
            },
            SubMode::Ltp,
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], "unsubscribe");
    }

    #[test]
    fn test_auth_message_parsing() {
        let msg: FeedMessage =
            serde_json::from_str(r#"{"type": "auth", "status": "success"}"#).unwrap();
        assert!(msg.is_auth_success());

        let msg: FeedMessage =
            serde_json::from_str(r#"{"type": "auth", "status": "invalid_token"}"#).unwrap();
        assert!(!msg.is_auth_success());
    }

    #[test]
    fn test_market_data_parsing() {
        let json = r#"{
            "type": "market_data",
            "symbol": "RELIANCE",
            "exchange": "NSE",
            "data": {"ltp": 2510.5, "volume": 125000, "ts": 1754452500123}
        }"#;

        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        match msg {
            FeedMessage::MarketData {
                symbol,
                exchange,
                data,
            } => {
                assert_eq!(symbol, "RELIANCE");
                assert_eq!(exchange, Exchange::Nse);
                assert!(data.fields.ltp.is_some());
                assert_eq!(data.ts, Some(1_754_452_500_123));
            }
            other => panic!("expected MarketData, got {other:?}"),
        }
    }

    #[test]
    fn test_market_data_partial_fields() {
        // LTP-only tick: every other field stays None.
        let json = r#"{
            "type": "market_data",
            "symbol": "INFY",
            "exchange": "NSE",
            "data": {"ltp": 1450}
        }"#;

        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        match msg {
            FeedMessage::MarketData { data, .. } => {
                assert!(data.fields.ltp.is_some());
                assert!(data.fields.open.is_none());
                assert!(data.ts.is_none());
            }
            other => panic!("expected MarketData, got {other:?}"),
        }
    }

    #[test]
    fn test_error_message_parsing() {
        let msg: FeedMessage =
            serde_json::from_str(r#"{"type": "error", "message": "bad subscription"}"#).unwrap();
        assert_eq!(
            msg,
            FeedMessage::Error {
                message: "bad subscription".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_message_rejected() {
        assert!(serde_json::from_str::<FeedMessage>("not json").is_err());
        assert!(serde_json::from_str::<FeedMessage>(r#"{"type": "unknown"}"#).is_err());
        // Missing required fields also fails per-message, never panics.
        assert!(serde_json::from_str::<FeedMessage>(r#"{"type": "market_data"}"#).is_err());
    }
}
