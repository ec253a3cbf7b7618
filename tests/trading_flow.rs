//! End-to-end flows through the trading and challenge services against an
//! in-memory database: open positions, mark-to-market, square-off, the rule
//! engine verdict, and the daily summary rollup.

use async_trait::async_trait;
use chrono::Utc;
use propdesk::application::services::challenges::{ChallengeService, EvaluateTarget};
use propdesk::application::services::trading::{Caller, ExecuteTrade, TradingService};
use propdesk::domain::errors::ApiError;
use propdesk::domain::repositories::quote_source::{Quote, QuoteSource};
use propdesk::persistence::repository::{
    ChallengeRepository, MockQuoteRepository, SessionRepository, SummaryRepository,
};
use propdesk::persistence::{init_database, DbPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct ScriptedQuotes {
    prices: Mutex<HashMap<String, f64>>,
}

impl ScriptedQuotes {
    fn new(prices: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            prices: Mutex::new(prices.iter().map(|(s, p)| (s.to_string(), *p)).collect()),
        })
    }

    fn set(&self, scrip: &str, ltp: f64) {
        self.prices.lock().unwrap().insert(scrip.to_string(), ltp);
    }

    fn clear(&self) {
        self.prices.lock().unwrap().clear();
    }
}

#[async_trait]
impl QuoteSource for ScriptedQuotes {
    async fn live_price(&self, scrip: &str, _exchange: &str) -> Option<Quote> {
        let ltp = *self.prices.lock().unwrap().get(scrip)?;
        Some(Quote {
            scrip: scrip.to_string(),
            ltp,
            symbol_token: "1".to_string(),
            trading_symbol: format!("{scrip}-EQ"),
            scrip_full_name: format!("{scrip} LTD"),
        })
    }
}

struct Harness {
    pool: DbPool,
    quotes: Arc<ScriptedQuotes>,
    trading: TradingService,
    challenges: ChallengeService,
    caller: Caller,
    challenge_id: i64,
}

async fn harness(prices: &[(&str, f64)]) -> Harness {
    let pool = init_database("sqlite::memory:").await.unwrap();

    let sessions = SessionRepository::new(pool.clone());
    let user = sessions.create_user("alice", "TRADER").await.unwrap();
    let repo = ChallengeRepository::new(pool.clone());
    let plan = repo
        .create_plan("Starter", 100_000.0, 8.0, 10.0, 4.0, 30, 1)
        .await
        .unwrap();
    let challenge = repo
        .create_challenge(user.id, plan.id, "ACTIVE", Utc::now())
        .await
        .unwrap();

    let quotes = ScriptedQuotes::new(prices);
    let source: Arc<dyn QuoteSource> = quotes.clone();
    let trading = TradingService::new(pool.clone(), source, 100, 330, "NSE".to_string());
    let challenges = ChallengeService::new(pool.clone(), 330);

    Harness {
        pool,
        quotes,
        trading,
        challenges,
        caller: Caller {
            user_id: user.id,
            is_admin: false,
        },
        challenge_id: challenge.id,
    }
}

fn order(challenge_id: i64, scrip: &str, quantity: f64, trade_type: &str) -> ExecuteTrade {
    ExecuteTrade {
        challenge_id,
        scrip: scrip.to_string(),
        quantity,
        trade_type: trade_type.to_string(),
        exchange: None,
    }
}

#[tokio::test]
async fn open_mark_close_round_trip() {
    let h = harness(&[("RELIANCE", 2500.0), ("TCS", 3800.0)]).await;

    let long = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "RELIANCE", 10.0, "BUY"))
        .await
        .unwrap();
    let short = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "TCS", 5.0, "SELL"))
        .await
        .unwrap();
    assert_eq!(short.summary.open_trades, 2);
    assert_eq!(short.portfolio.capital_used, 25_000.0 + 19_000.0);

    // Market moves: long gains, short loses the same way it would on a desk
    h.quotes.set("RELIANCE", 2550.0);
    h.quotes.set("TCS", 3900.0);

    let closed_long = h.trading.square_off(&h.caller, long.trade.id).await.unwrap();
    assert_eq!(closed_long.trade.pnl, 500.0);

    let closed_short = h
        .trading
        .square_off(&h.caller, short.trade.id)
        .await
        .unwrap();
    assert_eq!(closed_short.trade.pnl, -500.0);

    assert_eq!(closed_short.portfolio.realized_pnl, 0.0);
    assert_eq!(closed_short.summary.open_trades, 0);
    assert_eq!(closed_short.summary.closed_trades, 2);
    assert_eq!(closed_short.summary.total_trades, 2);
}

#[tokio::test]
async fn quote_outage_degrades_to_stored_mock_then_entry_price() {
    let h = harness(&[("INFY", 1500.0)]).await;

    let opened = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "INFY", 10.0, "BUY"))
        .await
        .unwrap();

    // Live feed goes dark; the stored fallback quote takes over
    h.quotes.clear();
    MockQuoteRepository::new(h.pool.clone())
        .upsert("INFY", 1520.0, Some("INFOSYS LTD"))
        .await
        .unwrap();

    let closed = h.trading.square_off(&h.caller, opened.trade.id).await.unwrap();
    assert_eq!(closed.trade.exit_price, Some(1520.0));
    assert_eq!(closed.trade.pnl, 200.0);

    // No live quote and no fallback row: a second position closes flat
    let reopened = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "INFY", 10.0, "BUY"))
        .await
        .unwrap();
    assert_eq!(reopened.trade.entry_price, 1520.0);

    sqlx::query("DELETE FROM mock_market_data")
        .execute(&h.pool)
        .await
        .unwrap();
    let flat = h
        .trading
        .square_off(&h.caller, reopened.trade.id)
        .await
        .unwrap();
    assert_eq!(flat.trade.exit_price, Some(1520.0));
    assert_eq!(flat.trade.pnl, 0.0);
}

#[tokio::test]
async fn execute_without_any_quote_is_not_found() {
    let h = harness(&[]).await;
    let err = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "UNLISTED", 1.0, "BUY"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn realized_loss_fails_the_challenge_on_evaluation() {
    let h = harness(&[("RELIANCE", 2500.0)]).await;

    let opened = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "RELIANCE", 40.0, "BUY"))
        .await
        .unwrap();

    // 40 * (2500 - 2200) = 12,000 loss; the plan allows 10,000
    h.quotes.set("RELIANCE", 2200.0);
    h.trading.square_off(&h.caller, opened.trade.id).await.unwrap();

    // Record the day's result as a metrics row the evaluator can see
    let stored = ChallengeRepository::new(h.pool.clone())
        .get(h.challenge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.current_pnl, -12_000.0);
    propdesk::persistence::repository::MetricsRepository::new(h.pool.clone())
        .insert(propdesk::persistence::models::CreateMetrics {
            challenge_id: h.challenge_id,
            date: propdesk::domain::services::market_time::local_day(Utc::now(), 330),
            daily_pnl: -12_000.0,
            cumulative_pnl: -12_000.0,
            trades_count: 1,
            win_rate: 0.0,
            max_drawdown: 12_000.0,
            profit_target: 8_000.0,
            violations: 0,
        })
        .await
        .unwrap();

    let views = h
        .challenges
        .evaluate_challenges(&h.caller, EvaluateTarget::One(h.challenge_id), true, Utc::now())
        .await
        .unwrap();
    assert!(views[0].evaluation.failed);
    assert!(views[0].persisted);

    let after = ChallengeRepository::new(h.pool.clone())
        .get(h.challenge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, "FAILED");

    // A failed challenge refuses new trades
    let err = h
        .trading
        .execute(&h.caller, order(h.challenge_id, "RELIANCE", 1.0, "BUY"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    // And a re-evaluation echoes the stored verdict without new violations
    let again = h
        .challenges
        .evaluate_challenges(&h.caller, EvaluateTarget::One(h.challenge_id), true, Utc::now())
        .await
        .unwrap();
    assert!(again[0].evaluation.failed);
    assert!(again[0].evaluation.violations.is_empty());
    assert!(!again[0].persisted);
}

#[tokio::test]
async fn auto_square_off_then_summary_reflects_flat_book() {
    let h = harness(&[("RELIANCE", 2500.0), ("INFY", 1500.0)]).await;

    h.trading
        .execute(&h.caller, order(h.challenge_id, "RELIANCE", 4.0, "BUY"))
        .await
        .unwrap();
    h.trading
        .execute(&h.caller, order(h.challenge_id, "INFY", 10.0, "SELL"))
        .await
        .unwrap();

    h.quotes.set("RELIANCE", 2525.0);
    h.quotes.set("INFY", 1490.0);

    let outcome = h.trading.auto_square_off(None).await.unwrap();
    assert_eq!(outcome.closed_trades.len(), 2);
    assert!(outcome.closed_trades.iter().all(|t| t.auto_squared_off));

    let pnl_total: f64 = outcome.closed_trades.iter().map(|t| t.pnl).sum();
    assert_eq!(pnl_total, 100.0 + 100.0);

    let summary = SummaryRepository::new(h.pool.clone())
        .latest(h.challenge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.open_trades, 0);
    assert_eq!(summary.realized_pnl, 200.0);
    assert_eq!(summary.capital_used, 0.0);
    // Realized profit never lifts available capital past the account size
    assert_eq!(summary.capital_available, 100_000.0);
}

#[tokio::test]
async fn status_view_carries_plan_limits_and_progress() {
    let h = harness(&[("RELIANCE", 2500.0)]).await;

    let view = h.challenges.status(&h.caller, h.challenge_id).await.unwrap();
    assert_eq!(view.plan.account_size, 100_000.0);
    assert_eq!(view.challenge.status, "ACTIVE");
    assert!(!view.metrics.is_empty());
    assert!(view.evaluation.progress_pct >= 0.0 && view.evaluation.progress_pct <= 100.0);
    assert!(view.demo_account_credentials.is_some());
}
