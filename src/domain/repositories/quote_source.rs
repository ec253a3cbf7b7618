//! Quote Source Trait
//!
//! Abstraction over the live broker price feed. Decouples the trading and
//! accounting services from the concrete broker client and enables mocking
//! in tests. A missing quote is an ordinary `None`, never an error: callers
//! degrade to the fallback quote store or the trade's entry price.

use async_trait::async_trait;

/// A resolved live quote for a scrip
#[derive(Debug, Clone)]
pub struct Quote {
    pub scrip: String,
    pub ltp: f64,
    pub symbol_token: String,
    pub trading_symbol: String,
    pub scrip_full_name: String,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Last traded price for a scrip, or `None` when it cannot be resolved
    async fn live_price(&self, scrip: &str, exchange: &str) -> Option<Quote>;
}
