//! Application layer: shared state, services and HTTP handlers.

pub mod handlers;
pub mod services;

use crate::config::AppConfig;
use crate::domain::repositories::quote_source::QuoteSource;
use crate::persistence::DbPool;
use services::challenges::ChallengeService;
use services::trading::TradingService;
use std::sync::Arc;

/// Shared state behind every handler
pub struct AppState {
    pub pool: DbPool,
    pub config: AppConfig,
    pub quotes: Arc<dyn QuoteSource>,
    pub trading: TradingService,
    pub challenges: ChallengeService,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig, quotes: Arc<dyn QuoteSource>) -> Self {
        let trading = TradingService::new(
            pool.clone(),
            quotes.clone(),
            config.daily_trade_cap,
            config.exchange_offset_minutes,
            config.default_exchange.clone(),
        );
        let challenges = ChallengeService::new(pool.clone(), config.exchange_offset_minutes);
        AppState {
            pool,
            config,
            quotes,
            trading,
            challenges,
        }
    }
}
