//! Trading Service
//!
//! Simulated order execution against live quotes: opening positions,
//! squaring them off, and the end-of-day auto square-off sweep. Every
//! mutating operation for a challenge runs under that challenge's lock so
//! the capital check and the insert are atomic with respect to each other.

use crate::domain::entities::challenge::ChallengeStatus;
use crate::domain::entities::trade::{Trade, TradeStatus, TradeType};
use crate::domain::errors::ApiError;
use crate::domain::repositories::quote_source::QuoteSource;
use crate::domain::services::capital::{
    self, required_capital, round2, unrealized_pnl, QuoteBook,
};
use crate::domain::services::market_time::{local_day, local_day_bounds};
use crate::persistence::models::{
    CreateTrade, DailySummaryRecord, TradeRecord, UpsertSummary, UserChallengeRecord,
};
use crate::persistence::repository::{
    ChallengeRepository, MockQuoteRepository, SummaryRepository, TradeRepository,
};
use crate::persistence::DbPool;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// One mutex per challenge id, created on first use. Serializes the
/// read-check-insert sequence in `execute` against concurrent trades on the
/// same challenge; different challenges proceed in parallel.
#[derive(Clone, Default)]
pub struct ChallengeLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl ChallengeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, challenge_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(challenge_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Execute-trade input, already authenticated but not yet validated
#[derive(Debug, Clone)]
pub struct ExecuteTrade {
    pub challenge_id: i64,
    pub scrip: String,
    pub quantity: f64,
    pub trade_type: String,
    pub exchange: Option<String>,
}

/// Capital position of a challenge at current quotes
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub capital_used: f64,
    pub capital_available: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Result of a single execute or square-off
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub trade: TradeRecord,
    pub summary: DailySummaryRecord,
    pub portfolio: PortfolioSnapshot,
}

/// Result of an auto square-off sweep
#[derive(Debug, Clone, Serialize)]
pub struct AutoSquareOffOutcome {
    pub closed_trades: Vec<TradeRecord>,
    pub summaries: Vec<DailySummaryRecord>,
}

/// Caller identity as the service needs it; handlers build this from the
/// authenticated session
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: i64,
    pub is_admin: bool,
}

#[derive(Clone)]
pub struct TradingService {
    pool: DbPool,
    quotes: Arc<dyn QuoteSource>,
    locks: ChallengeLocks,
    daily_trade_cap: i64,
    exchange_offset_minutes: i32,
    default_exchange: String,
}

impl TradingService {
    pub fn new(
        pool: DbPool,
        quotes: Arc<dyn QuoteSource>,
        daily_trade_cap: i64,
        exchange_offset_minutes: i32,
        default_exchange: String,
    ) -> Self {
        Self {
            pool,
            quotes,
            locks: ChallengeLocks::new(),
            daily_trade_cap,
            exchange_offset_minutes,
            default_exchange,
        }
    }

    /// Open a simulated position at the current quote.
    pub async fn execute(&self, caller: &Caller, req: ExecuteTrade) -> Result<TradeOutcome, ApiError> {
        let scrip = req.scrip.trim().to_uppercase();
        if scrip.is_empty() {
            return Err(ApiError::Validation("scrip must not be empty".to_string()));
        }
        if !(req.quantity > 0.0) {
            return Err(ApiError::Validation(
                "quantity must be a positive number".to_string(),
            ));
        }
        let trade_type: TradeType = req
            .trade_type
            .parse()
            .map_err(ApiError::Validation)?;
        let exchange = req
            .exchange
            .unwrap_or_else(|| self.default_exchange.clone());

        let _guard = self.locks.acquire(req.challenge_id).await;

        let challenges = ChallengeRepository::new(self.pool.clone());
        let challenge = challenges
            .get(req.challenge_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("challenge not found".to_string()))?;
        self.ensure_owner(caller, &challenge)?;
        self.ensure_active(&challenge)?;

        let now = Utc::now();
        let trades = TradeRepository::new(self.pool.clone());

        // An unresolvable scrip reads as NotFound even when the day is capped
        let (ltp, scrip_full_name) = self.resolve_price(&scrip, &exchange).await?;

        let (day_start, day_end) = local_day_bounds(now, self.exchange_offset_minutes);
        let entered_today = trades
            .count_entered_between(challenge.id, day_start, day_end)
            .await?;
        if entered_today >= self.daily_trade_cap {
            warn!(
                challenge_id = challenge.id,
                entered_today, "daily trade limit reached"
            );
            return Err(ApiError::Forbidden("daily trade limit reached".to_string()));
        }

        // Capital check marks the whole open book to current quotes
        let open = self.open_positions(&trades, challenge.id).await?;
        let book = self.quote_book(&open, &exchange).await?;
        let realized_total = trades.realized_pnl(challenge.id).await?;
        let account_size = self.account_size(&challenges, challenge.plan_id).await?;
        let available =
            capital::capital_available(account_size, &open, &book, realized_total);
        let required = required_capital(req.quantity, ltp);
        if required > available {
            return Err(ApiError::Forbidden(format!(
                "insufficient capital: required {:.2}, available {:.2}",
                required,
                available.max(0.0)
            )));
        }

        let record = trades
            .create(CreateTrade {
                challenge_id: challenge.id,
                scrip: scrip.clone(),
                scrip_full_name,
                quantity: req.quantity,
                entry_price: ltp,
                trade_type: trade_type.to_string(),
                entry_time: now,
            })
            .await?;
        info!(
            trade_id = record.id,
            challenge_id = challenge.id,
            %scrip,
            ltp,
            "executed trade"
        );

        let (summary, portfolio) = self
            .recompute(&challenge, &exchange, account_size, now)
            .await?;
        Ok(TradeOutcome {
            trade: record,
            summary,
            portfolio,
        })
    }

    /// Close one OPEN trade at the current quote.
    pub async fn square_off(&self, caller: &Caller, trade_id: i64) -> Result<TradeOutcome, ApiError> {
        let trades = TradeRepository::new(self.pool.clone());
        let record = trades
            .get(trade_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("trade not found".to_string()))?;

        let _guard = self.locks.acquire(record.challenge_id).await;

        let challenges = ChallengeRepository::new(self.pool.clone());
        let challenge = challenges
            .get(record.challenge_id)
            .await?
            .ok_or_else(|| ApiError::internal("trade references a missing challenge"))?;
        self.ensure_owner(caller, &challenge)?;

        if record.status != TradeStatus::Open.to_string() {
            return Err(ApiError::BadRequest("trade is already closed".to_string()));
        }
        let trade = Trade::try_from(&record).map_err(ApiError::internal)?;

        let exchange = self.default_exchange.clone();
        let exit_price = self
            .resolve_price(&trade.scrip, &exchange)
            .await
            .map(|(ltp, _)| ltp)
            .unwrap_or(trade.entry_price);
        let pnl = round2(unrealized_pnl(&trade, exit_price));

        let now = Utc::now();
        let closed = trades.close(trade.id, exit_price, pnl, now, false).await?;
        if !closed {
            // Lost the race with an auto square-off sweep
            return Err(ApiError::BadRequest("trade is already closed".to_string()));
        }
        info!(trade_id = trade.id, exit_price, pnl, "squared off trade");

        let account_size = self.account_size(&challenges, challenge.plan_id).await?;
        let (summary, portfolio) = self
            .recompute(&challenge, &exchange, account_size, now)
            .await?;
        let record = trades
            .get(trade.id)
            .await?
            .ok_or_else(|| ApiError::internal("closed trade disappeared"))?;
        Ok(TradeOutcome {
            trade: record,
            summary,
            portfolio,
        })
    }

    /// Close every OPEN trade, optionally scoped to one challenge. Quotes are
    /// fetched once per distinct scrip; a scrip with no quote closes flat at
    /// its entry price.
    pub async fn auto_square_off(
        &self,
        challenge_id: Option<i64>,
    ) -> Result<AutoSquareOffOutcome, ApiError> {
        let trades = TradeRepository::new(self.pool.clone());
        let open = trades.all_open(challenge_id).await?;
        if open.is_empty() {
            debug!("auto square-off: nothing open");
            return Ok(AutoSquareOffOutcome {
                closed_trades: Vec::new(),
                summaries: Vec::new(),
            });
        }

        let exchange = self.default_exchange.clone();
        let scrips: HashSet<String> = open.iter().map(|t| t.scrip.clone()).collect();
        let mut prices: HashMap<String, f64> = HashMap::new();
        for scrip in scrips {
            if let Ok((ltp, _)) = self.resolve_price(&scrip, &exchange).await {
                prices.insert(scrip, ltp);
            }
        }

        let mut closures: Vec<(i64, f64, f64)> = Vec::with_capacity(open.len());
        for record in &open {
            let trade = Trade::try_from(record).map_err(ApiError::internal)?;
            let exit_price = prices.get(&trade.scrip).copied().unwrap_or(trade.entry_price);
            let pnl = round2(unrealized_pnl(&trade, exit_price));
            closures.push((trade.id, exit_price, pnl));
        }

        let now = Utc::now();
        trades.close_batch(&closures, now).await?;
        info!(count = closures.len(), "auto squared off open trades");

        let challenges = ChallengeRepository::new(self.pool.clone());
        let mut affected: Vec<i64> = open.iter().map(|t| t.challenge_id).collect();
        affected.sort_unstable();
        affected.dedup();

        let mut summaries = Vec::with_capacity(affected.len());
        for id in affected {
            let Some(challenge) = challenges.get(id).await? else {
                warn!(challenge_id = id, "open trade referenced a missing challenge");
                continue;
            };
            let account_size = self.account_size(&challenges, challenge.plan_id).await?;
            let (summary, _) = self
                .recompute(&challenge, &exchange, account_size, now)
                .await?;
            summaries.push(summary);
        }

        let mut closed_trades = Vec::with_capacity(open.len());
        for record in open {
            if let Some(updated) = trades.get(record.id).await? {
                closed_trades.push(updated);
            }
        }

        Ok(AutoSquareOffOutcome {
            closed_trades,
            summaries,
        })
    }

    /// Current capital position without mutating anything.
    pub async fn portfolio(
        &self,
        caller: &Caller,
        challenge_id: i64,
    ) -> Result<PortfolioSnapshot, ApiError> {
        let challenges = ChallengeRepository::new(self.pool.clone());
        let challenge = challenges
            .get(challenge_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("challenge not found".to_string()))?;
        self.ensure_owner(caller, &challenge)?;

        let trades = TradeRepository::new(self.pool.clone());
        let open = self.open_positions(&trades, challenge.id).await?;
        let book = self.quote_book(&open, &self.default_exchange).await?;
        let realized_total = trades.realized_pnl(challenge.id).await?;
        let account_size = self.account_size(&challenges, challenge.plan_id).await?;
        Ok(snapshot(account_size, &open, &book, realized_total))
    }

    fn ensure_owner(
        &self,
        caller: &Caller,
        challenge: &UserChallengeRecord,
    ) -> Result<(), ApiError> {
        if caller.is_admin || challenge.user_id == caller.user_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "challenge belongs to another user".to_string(),
            ))
        }
    }

    fn ensure_active(&self, challenge: &UserChallengeRecord) -> Result<(), ApiError> {
        if challenge.status == ChallengeStatus::Active.to_string() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "challenge is not active (status: {})",
                challenge.status
            )))
        }
    }

    async fn account_size(
        &self,
        challenges: &ChallengeRepository,
        plan_id: i64,
    ) -> Result<f64, ApiError> {
        let plan = challenges
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| ApiError::internal("challenge references a missing plan"))?;
        Ok(plan.account_size)
    }

    async fn open_positions(
        &self,
        trades: &TradeRepository,
        challenge_id: i64,
    ) -> Result<Vec<Trade>, ApiError> {
        trades
            .open_for_challenge(challenge_id)
            .await?
            .iter()
            .map(|r| Trade::try_from(r).map_err(ApiError::internal))
            .collect()
    }

    /// Quote for a scrip: live feed first, then the fallback quote store.
    async fn resolve_price(
        &self,
        scrip: &str,
        exchange: &str,
    ) -> Result<(f64, Option<String>), ApiError> {
        if let Some(quote) = self.quotes.live_price(scrip, exchange).await {
            return Ok((quote.ltp, Some(quote.scrip_full_name)));
        }
        let mocks = MockQuoteRepository::new(self.pool.clone());
        if let Some(row) = mocks.get(scrip).await? {
            debug!(%scrip, "using fallback quote");
            return Ok((row.ltp, row.scrip_full_name));
        }
        Err(ApiError::NotFound(format!("no quote available for {scrip}")))
    }

    /// Quote book over the distinct scrips of an open set. Scrips that fail
    /// to resolve are simply absent; the capital functions fall back to each
    /// trade's entry price.
    async fn quote_book(&self, open: &[Trade], exchange: &str) -> Result<QuoteBook, ApiError> {
        let mut book = QuoteBook::new();
        let scrips: HashSet<&str> = open.iter().map(|t| t.scrip.as_str()).collect();
        for scrip in scrips {
            if let Ok((ltp, _)) = self.resolve_price(scrip, exchange).await {
                book.insert(scrip, ltp);
            }
        }
        Ok(book)
    }

    /// Recompute the daily summary and the challenge's running pnl from the
    /// trades table. Called after every mutation; the summary row is a pure
    /// derivation, overwritten in full.
    async fn recompute(
        &self,
        challenge: &UserChallengeRecord,
        exchange: &str,
        account_size: f64,
        at: DateTime<Utc>,
    ) -> Result<(DailySummaryRecord, PortfolioSnapshot), ApiError> {
        let trades = TradeRepository::new(self.pool.clone());
        let open = self.open_positions(&trades, challenge.id).await?;
        let book = self.quote_book(&open, exchange).await?;
        let realized_total = trades.realized_pnl(challenge.id).await?;

        let (day_start, day_end) = local_day_bounds(at, self.exchange_offset_minutes);
        let day_trades = trades
            .for_challenge_day(challenge.id, day_start, day_end)
            .await?;
        let entered_today = day_trades
            .iter()
            .filter(|t| t.entry_time >= day_start && t.entry_time < day_end)
            .count() as i64;
        let exited_today: Vec<&TradeRecord> = day_trades
            .iter()
            .filter(|t| {
                t.exit_time
                    .map(|x| x >= day_start && x < day_end)
                    .unwrap_or(false)
            })
            .collect();
        let realized_day: f64 = exited_today.iter().map(|t| t.pnl).sum();

        let unrealized = capital::unrealized_total(&open, &book);
        let used = capital::capital_used(&open, &book);
        let available =
            capital::capital_available(account_size, &open, &book, realized_total);
        let day_pnl_pct = if account_size > 0.0 {
            round2(100.0 * (realized_day + unrealized) / account_size)
        } else {
            0.0
        };

        let summaries = SummaryRepository::new(self.pool.clone());
        let summary = summaries
            .upsert(UpsertSummary {
                challenge_id: challenge.id,
                date: local_day(at, self.exchange_offset_minutes),
                total_trades: entered_today,
                open_trades: open.len() as i64,
                closed_trades: exited_today.len() as i64,
                realized_pnl: round2(realized_day),
                unrealized_pnl: round2(unrealized),
                capital_used: round2(used),
                capital_available: round2(available.max(0.0)),
                day_pnl_pct,
            })
            .await?;

        let current_pnl = round2(realized_total + unrealized);
        let max_drawdown = if current_pnl < 0.0 {
            challenge.max_drawdown.max(-current_pnl)
        } else {
            challenge.max_drawdown
        };
        let challenges = ChallengeRepository::new(self.pool.clone());
        challenges
            .update_pnl(challenge.id, current_pnl, max_drawdown)
            .await?;

        let portfolio = snapshot(account_size, &open, &book, realized_total);
        Ok((summary, portfolio))
    }
}

fn snapshot(
    account_size: f64,
    open: &[Trade],
    book: &QuoteBook,
    realized_total: f64,
) -> PortfolioSnapshot {
    PortfolioSnapshot {
        capital_used: round2(capital::capital_used(open, book)),
        capital_available: round2(
            capital::capital_available(account_size, open, book, realized_total).max(0.0),
        ),
        unrealized_pnl: round2(capital::unrealized_total(open, book)),
        realized_pnl: round2(realized_total),
    }
}
