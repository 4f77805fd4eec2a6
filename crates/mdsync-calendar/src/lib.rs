//! Trading calendar service.
//!
//! Resolves whether an exchange is currently open, accounting for
//! holidays and special sessions (e.g. Muhurat trading). Timings are
//! absolute instants resolved server-side for "today", so daylight and
//! holiday shifts are already baked in.
//!
//! Failure mode: if the timing/holiday fetch fails the service fails
//! closed; every exchange reports closed rather than assuming open.

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::CalendarClient;
pub use error::{CalendarError, CalendarResult};
pub use service::MarketCalendar;
pub use types::{Holiday, MarketPhase, MarketTiming};
