//! Derived per-position metrics.
//!
//! Recomputes live price and P&L for a list of positions from whichever
//! source is currently authoritative. Closed positions (zero quantity)
//! pass through untouched: realized P&L must never drift with the live
//! price. One item's bad data suppresses recomputation for that item
//! only, never the whole batch.

use mdsync_core::{DataSource, Position, Px, SymbolKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Price resolved for one instrument by the fallback controller.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedQuote {
    pub ltp: Option<Px>,
    pub source: DataSource,
}

/// A position with recomputed metrics and its data-source tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedPosition {
    #[serde(flatten)]
    pub position: Position,
    pub source: DataSource,
}

/// Portfolio aggregates, a pure fold over the enhanced items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub investment: Decimal,
    pub holding_value: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
}

impl PortfolioTotals {
    pub fn from_items(items: &[EnhancedPosition]) -> Self {
        let mut totals = Self::default();
        for item in items {
            let p = &item.position;
            let effective_px = p.ltp.unwrap_or(p.average_price);
            totals.investment += p.quantity.notional(p.average_price);
            totals.holding_value += p.quantity.notional(effective_px);
            totals.pnl += p.pnl;
        }
        totals.pnl_percent = if totals.investment.is_zero() {
            Decimal::ZERO
        } else {
            totals.pnl / totals.investment * Decimal::from(100)
        };
        totals
    }
}

/// Recompute metrics for a list of positions.
///
/// `resolve` supplies the authoritative price per instrument (the
/// controller's priority rule). Returns the enhanced items plus the
/// portfolio aggregates.
pub fn enhance_positions<F>(items: &[Position], resolve: F) -> (Vec<EnhancedPosition>, PortfolioTotals)
where
    F: Fn(&SymbolKey) -> ResolvedQuote,
{
    let enhanced: Vec<EnhancedPosition> = items
        .iter()
        .map(|item| enhance_one(item, &resolve))
        .collect();
    let totals = PortfolioTotals::from_items(&enhanced);
    (enhanced, totals)
}

fn enhance_one<F>(item: &Position, resolve: &F) -> EnhancedPosition
where
    F: Fn(&SymbolKey) -> ResolvedQuote,
{
    let resolved = resolve(&item.key());

    // Closed position: realized P&L is final. Pass through unchanged
    // except for the informational source tag.
    if item.is_closed() {
        return EnhancedPosition {
            position: item.clone(),
            source: resolved.source,
        };
    }

    // No resolved price and no baseline price: nothing to recompute.
    let Some(ltp) = resolved.ltp.or(item.ltp) else {
        return EnhancedPosition {
            position: item.clone(),
            source: resolved.source,
        };
    };

    // Missing or zero average price suppresses recomputation for this
    // item only; the baseline P&L stands.
    if item.average_price.is_zero() {
        debug!(symbol = %item.key(), "Zero average price; keeping baseline P&L");
        return EnhancedPosition {
            position: item.clone(),
            source: resolved.source,
        };
    }

    let qty = item.quantity.inner();
    let avg = item.average_price.inner();

    let unrealized = if item.quantity.is_long() {
        (ltp.inner() - avg) * qty
    } else {
        (avg - ltp.inner()) * qty.abs()
    };
    let total_pnl = unrealized + item.today_realized_pnl.unwrap_or(Decimal::ZERO);

    let investment = (avg * qty).abs();
    let pnl_percent = if investment.is_zero() {
        Decimal::ZERO
    } else {
        total_pnl / investment * Decimal::from(100)
    };

    let mut position = item.clone();
    position.ltp = Some(ltp);
    position.pnl = total_pnl;
    position.pnl_percent = pnl_percent;

    EnhancedPosition {
        position,
        source: resolved.source,
    }
}
