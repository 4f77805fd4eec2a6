//! Subscription multiplexing over the feed connection.
//!
//! Many independent consumers can watch the same instrument; the
//! multiplexer reference-counts `(symbol, mode)` subscriptions so that
//! exactly one wire-level subscribe/unsubscribe is sent per key, and
//! fans inbound ticks out to every registered listener through a shared
//! per-symbol cache.

pub mod cache;
pub mod multiplexer;

pub use cache::{QuoteCache, QuoteSnapshot};
pub use multiplexer::{Multiplexer, QuoteListener, Subscription};
