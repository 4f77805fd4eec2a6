//! Batch snapshot REST client.
//!
//! One POST fetches quotes for every tracked symbol at once:
//! `{"symbols": [{"symbol": ..., "exchange": ...}]}` →
//! `{"status": ..., "results": [{"symbol", "exchange", "data"}]}`.

use crate::error::{FallbackError, FallbackResult};
use mdsync_core::{Exchange, QuoteFields, SymbolKey, SymbolRef};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for snapshot requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct QuoteBatchRequest<'a> {
    symbols: &'a [SymbolRef],
}

#[derive(Debug, Deserialize)]
struct QuoteBatchResponse {
    status: String,
    #[serde(default)]
    results: Vec<QuoteBatchResult>,
}

#[derive(Debug, Deserialize)]
struct QuoteBatchResult {
    symbol: String,
    exchange: Exchange,
    data: QuoteFields,
}

/// Client for the multi-symbol quote snapshot endpoint.
pub struct SnapshotClient {
    client: Client,
    quotes_url: String,
}

impl SnapshotClient {
    pub fn new(quotes_url: impl Into<String>) -> FallbackResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| FallbackError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            quotes_url: quotes_url.into(),
        })
    }

    /// Fetch quotes for the given symbols in one request.
    pub async fn fetch_quotes(
        &self,
        symbols: &[SymbolRef],
    ) -> FallbackResult<Vec<(SymbolKey, QuoteFields)>> {
        debug!(count = symbols.len(), url = %self.quotes_url, "Fetching batch snapshot");

        let response = self
            .client
            .post(&self.quotes_url)
            .json(&QuoteBatchRequest { symbols })
            .send()
            .await
            .map_err(|e| FallbackError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FallbackError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body: QuoteBatchResponse = response
            .json()
            .await
            .map_err(|e| FallbackError::BadResponse(format!("Failed to parse snapshot: {e}")))?;

        if body.status != "success" {
            return Err(FallbackError::BadResponse(format!(
                "snapshot status: {}",
                body.status
            )));
        }

        let quotes: Vec<(SymbolKey, QuoteFields)> = body
            .results
            .into_iter()
            .map(|r| (SymbolKey::new(r.exchange, r.symbol), r.data))
            .collect();

        info!(count = quotes.len(), "Batch snapshot fetched");
        Ok(quotes)
    }
}
