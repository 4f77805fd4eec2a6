//! Live market data synchronization engine.
//!
//! Wires the calendar, connection manager, subscription multiplexer,
//! visibility scheduler, and fallback controller into one engine with a
//! small consumer contract: track a position list, read enhanced items
//! and liveness flags, never touch the wire protocol.

pub mod config;
pub mod engine;
pub mod error;
pub mod stream;

pub use config::AppConfig;
pub use engine::LiveDataEngine;
pub use error::{AppError, AppResult};
pub use stream::{PositionStream, StreamOptions};
