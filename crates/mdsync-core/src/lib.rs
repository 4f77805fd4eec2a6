//! Core domain types for the live market data synchronization engine.
//!
//! This crate provides fundamental types used throughout the system:
//! - `SymbolKey`: Unique identifier for an instrument (exchange + symbol)
//! - `Px`, `Qty`: Precision-safe numeric types
//! - `QuoteFields`: Partial quote data with field-by-field merge
//! - `Position`: Holdings enriched by the derived-metrics engine
//! - `DataSource`: Which source a displayed price came from

pub mod decimal;
pub mod error;
pub mod position;
pub mod quote;
pub mod symbol;

pub use decimal::{Px, Qty};
pub use error::{CoreError, Result};
pub use position::{DataSource, Position};
pub use quote::{DepthLevel, MarketDepth, QuoteFields};
pub use symbol::{Exchange, SubMode, SymbolKey, SymbolRef};
