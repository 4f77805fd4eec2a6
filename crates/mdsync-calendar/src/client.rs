//! HTTP client for the calendar backend.
//!
//! Fetches today's market timings and the holiday table. Entries naming
//! exchanges this build does not know are skipped with a warning rather
//! than failing the whole load.

use crate::error::{CalendarError, CalendarResult};
use crate::types::{Holiday, MarketTiming};
use chrono::{NaiveDate, TimeZone, Utc};
use mdsync_core::Exchange;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for calendar requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw timing entry: epoch milliseconds as delivered by the backend.
#[derive(Debug, Deserialize)]
struct RawTimingEntry {
    exchange: String,
    start_time: i64,
    end_time: i64,
}

#[derive(Debug, Deserialize)]
struct TimingsResponse {
    market_status: Vec<RawTimingEntry>,
}

#[derive(Debug, Deserialize)]
struct RawHoliday {
    date: NaiveDate,
    #[serde(default)]
    closed_exchanges: Vec<String>,
    /// Special sessions overriding the closure for a sub-window.
    #[serde(default)]
    open_exchanges: Vec<RawTimingEntry>,
}

#[derive(Debug, Deserialize)]
struct HolidaysResponse {
    data: Vec<RawHoliday>,
}

/// Client for the calendar REST endpoints.
pub struct CalendarClient {
    client: Client,
    timings_url: String,
    holidays_url: String,
}

impl CalendarClient {
    pub fn new(
        timings_url: impl Into<String>,
        holidays_url: impl Into<String>,
    ) -> CalendarResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| CalendarError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timings_url: timings_url.into(),
            holidays_url: holidays_url.into(),
        })
    }

    /// Fetch today's resolved trading windows.
    pub async fn fetch_timings(&self) -> CalendarResult<Vec<MarketTiming>> {
        info!(url = %self.timings_url, "Fetching market timings");

        let response = self
            .client
            .get(&self.timings_url)
            .send()
            .await
            .map_err(|e| CalendarError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body: TimingsResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::BadResponse(format!("Failed to parse timings: {e}")))?;

        let mut timings = Vec::with_capacity(body.market_status.len());
        for raw in body.market_status {
            match parse_timing(&raw) {
                Some(timing) => timings.push(timing),
                None => warn!(exchange = %raw.exchange, "Skipping unrecognized timing entry"),
            }
        }

        info!(count = timings.len(), "Fetched market timings");
        Ok(timings)
    }

    /// Fetch the holiday table for the session.
    pub async fn fetch_holidays(&self) -> CalendarResult<Vec<Holiday>> {
        info!(url = %self.holidays_url, "Fetching holiday table");

        let response = self
            .client
            .get(&self.holidays_url)
            .send()
            .await
            .map_err(|e| CalendarError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body: HolidaysResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::BadResponse(format!("Failed to parse holidays: {e}")))?;

        let mut holidays = Vec::with_capacity(body.data.len());
        for raw in body.data {
            let mut closed = Vec::new();
            for name in &raw.closed_exchanges {
                match name.parse::<Exchange>() {
                    Ok(ex) => closed.push(ex),
                    Err(_) => {
                        warn!(exchange = %name, date = %raw.date, "Skipping unknown exchange in holiday record");
                    }
                }
            }

            let mut sessions = Vec::new();
            for entry in &raw.open_exchanges {
                match parse_timing(entry) {
                    Some(timing) => sessions.push(timing),
                    None => {
                        warn!(exchange = %entry.exchange, date = %raw.date, "Skipping unrecognized special session");
                    }
                }
            }

            holidays.push(Holiday {
                date: raw.date,
                closed_exchanges: closed,
                special_sessions: sessions,
            });
        }

        debug!(count = holidays.len(), "Fetched holiday table");
        Ok(holidays)
    }
}

fn parse_timing(raw: &RawTimingEntry) -> Option<MarketTiming> {
    let exchange = raw.exchange.parse::<Exchange>().ok()?;
    let start = Utc.timestamp_millis_opt(raw.start_time).single()?;
    let end = Utc.timestamp_millis_opt(raw.end_time).single()?;
    Some(MarketTiming {
        exchange,
        start,
        end,
    })
}
