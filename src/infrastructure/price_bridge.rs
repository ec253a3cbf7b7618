//! Live Price Bridge
//!
//! Resolves human-readable scrips to broker instrument tokens and fetches
//! their last traded price. Token mappings live in the owned
//! `InstrumentCache`; a stale broker session gets exactly one forced refresh
//! and retry, and every other failure degrades to `None` so accounting can
//! fall back to the mock quote store or the trade's entry price.

use crate::domain::repositories::quote_source::{Quote, QuoteSource};
use crate::infrastructure::broker::{BrokerClient, BrokerError, ScripMatch};
use crate::infrastructure::instrument_cache::{InstrumentCache, InstrumentToken};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PriceBridge {
    broker: Arc<BrokerClient>,
    cache: InstrumentCache,
}

impl PriceBridge {
    pub fn new(broker: Arc<BrokerClient>, cache: InstrumentCache) -> Self {
        Self { broker, cache }
    }

    /// Normalize a display symbol to a searchable scrip: keep the first
    /// whitespace-separated token, drop a trailing "-EQ" decoration, strip
    /// the remaining special characters, uppercase.
    pub fn sanitize_scrip(scrip: &str) -> String {
        let head = scrip.trim().split_whitespace().next().unwrap_or("");
        let head = head.strip_suffix("-EQ").unwrap_or(head);
        head.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    /// Prefer the equity ("-EQ") listing on NSE, else the first hit
    pub fn pick_match<'a>(matches: &'a [ScripMatch], exchange: &str) -> Option<&'a ScripMatch> {
        if exchange == "NSE" {
            if let Some(eq) = matches.iter().find(|m| m.trading_symbol.ends_with("-EQ")) {
                return Some(eq);
            }
        }
        matches.first()
    }

    /// Resolve a scrip to its instrument token, consulting the cache first
    pub async fn resolve_token(
        &self,
        scrip: &str,
        exchange: &str,
        force_refresh: bool,
    ) -> Result<InstrumentToken, BrokerError> {
        let sanitized = Self::sanitize_scrip(scrip);
        let key = format!("{}:{}", exchange, sanitized);

        if force_refresh {
            self.cache.invalidate(&key);
        } else if let Some(token) = self.cache.get(&key) {
            return Ok(token);
        }

        let matches = self.broker.search_scrip(exchange, &sanitized).await?;
        let chosen = Self::pick_match(&matches, exchange).ok_or_else(|| BrokerError::Api {
            code: "NO_MATCH".to_string(),
            message: format!("no instrument found for '{}' on {}", sanitized, exchange),
        })?;

        let token = InstrumentToken {
            symbol_token: chosen.symbol_token.clone(),
            trading_symbol: chosen.trading_symbol.clone(),
            scrip_full_name: chosen
                .trading_symbol
                .strip_suffix("-EQ")
                .unwrap_or(&chosen.trading_symbol)
                .to_string(),
        };
        self.cache.insert(key, token.clone());
        debug!("Resolved {} on {} -> token {}", sanitized, exchange, token.symbol_token);

        Ok(token)
    }

    async fn try_live(&self, scrip: &str, exchange: &str) -> Result<Quote, BrokerError> {
        let token = self.resolve_token(scrip, exchange, false).await?;
        let ltp = self
            .broker
            .ltp(exchange, &token.trading_symbol, &token.symbol_token)
            .await?;

        Ok(Quote {
            scrip: Self::sanitize_scrip(scrip),
            ltp,
            symbol_token: token.symbol_token,
            trading_symbol: token.trading_symbol,
            scrip_full_name: token.scrip_full_name,
        })
    }
}

#[async_trait]
impl QuoteSource for PriceBridge {
    async fn live_price(&self, scrip: &str, exchange: &str) -> Option<Quote> {
        if !self.broker.is_configured() {
            debug!("Broker not configured, no live quote for {}", scrip);
            return None;
        }

        match self.try_live(scrip, exchange).await {
            Ok(quote) => Some(quote),
            Err(BrokerError::AuthStale) => {
                warn!("Broker session stale, refreshing once for {}", scrip);
                if let Err(e) = self.broker.force_refresh().await {
                    warn!("Broker session refresh failed: {}", e);
                    return None;
                }
                match self.try_live(scrip, exchange).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        warn!("Live quote for {} failed after refresh: {}", scrip, e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Live quote for {} unavailable: {}", scrip, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(trading_symbol: &str, token: &str) -> ScripMatch {
        ScripMatch {
            exchange: "NSE".to_string(),
            trading_symbol: trading_symbol.to_string(),
            symbol_token: token.to_string(),
        }
    }

    #[test]
    fn test_sanitize_strips_decorations() {
        assert_eq!(PriceBridge::sanitize_scrip("Reliance Industries"), "RELIANCE");
        assert_eq!(PriceBridge::sanitize_scrip("TCS-EQ"), "TCS");
        assert_eq!(PriceBridge::sanitize_scrip(" m&m "), "MM");
        assert_eq!(PriceBridge::sanitize_scrip("infy"), "INFY");
        assert_eq!(PriceBridge::sanitize_scrip(""), "");
    }

    #[test]
    fn test_pick_match_prefers_nse_equity() {
        let matches = vec![hit("RELIANCE-BE", "1"), hit("RELIANCE-EQ", "2885")];

        let chosen = PriceBridge::pick_match(&matches, "NSE").unwrap();
        assert_eq!(chosen.symbol_token, "2885");

        // Off NSE the first hit wins
        let chosen = PriceBridge::pick_match(&matches, "BSE").unwrap();
        assert_eq!(chosen.symbol_token, "1");

        assert!(PriceBridge::pick_match(&[], "NSE").is_none());
    }
}
