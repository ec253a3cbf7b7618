//! Capital accounting
//!
//! Pure functions over a quote lookup. No margin or leverage model: a trade
//! consumes `quantity * ltp` of capital while open. Realized losses shrink
//! available capital; realized profit never enlarges it.

use crate::domain::entities::trade::Trade;
use std::collections::HashMap;

/// Per-request snapshot of resolved quotes, keyed by scrip.
///
/// Lookups fall back to the price the caller supplies (typically the trade's
/// entry price), so accounting never fails outright on a missing quote.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    quotes: HashMap<String, f64>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scrip: impl Into<String>, ltp: f64) {
        self.quotes.insert(scrip.into(), ltp);
    }

    pub fn get(&self, scrip: &str) -> Option<f64> {
        self.quotes.get(scrip).copied()
    }

    /// Quote for a scrip, or the supplied fallback when unresolved
    pub fn price_or(&self, scrip: &str, fallback: f64) -> f64 {
        self.get(scrip).unwrap_or(fallback)
    }
}

/// Round to 2 decimals for persisted monetary values
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Capital consumed by a position at the given price
pub fn required_capital(quantity: f64, ltp: f64) -> f64 {
    quantity * ltp
}

/// Direction-signed mark-to-market pnl for one trade
pub fn unrealized_pnl(trade: &Trade, ltp: f64) -> f64 {
    trade.trade_type.direction() * (ltp - trade.entry_price) * trade.quantity
}

/// Total capital in use across the OPEN set at current quotes
pub fn capital_used(open_trades: &[Trade], quotes: &QuoteBook) -> f64 {
    open_trades
        .iter()
        .map(|t| required_capital(t.quantity, quotes.price_or(&t.scrip, t.entry_price)))
        .sum()
}

/// Total mark-to-market pnl across the OPEN set
pub fn unrealized_total(open_trades: &[Trade], quotes: &QuoteBook) -> f64 {
    open_trades
        .iter()
        .map(|t| unrealized_pnl(t, quotes.price_or(&t.scrip, t.entry_price)))
        .sum()
}

/// Realized losses to date; profit never offsets this figure
pub fn realized_loss(realized_pnl_total: f64) -> f64 {
    (-realized_pnl_total).max(0.0)
}

/// Capital remaining for new positions. May be negative internally; callers
/// floor it at 0 before returning it to clients.
pub fn capital_available(
    account_size: f64,
    open_trades: &[Trade],
    quotes: &QuoteBook,
    realized_pnl_total: f64,
) -> f64 {
    account_size - capital_used(open_trades, quotes) - realized_loss(realized_pnl_total)
}
