//! Database Repository
//!
//! Data access layer for challenges, trades, metrics, summaries, quotes and
//! the broker session cache.

use super::models::*;
use super::{DatabaseError, DbPool};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

fn query_err(what: &str, e: sqlx::Error) -> DatabaseError {
    error!("{}: {}", what, e);
    DatabaseError::QueryError(format!("{}: {}", what, e))
}

/// Session repository: bearer token -> user identity
pub struct SessionRepository {
    pool: DbPool,
}

impl SessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolve a session token to its user, if the session exists
    pub async fn user_for_token(&self, token: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT u.id, u.name, u.role
            FROM sessions s JOIN users u ON u.id = s.user_id
            WHERE s.token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_err("Failed to resolve session", e))?;

        Ok(record)
    }

    /// Create a user (test/seed support; identity is otherwise externally managed)
    pub async fn create_user(&self, name: &str, role: &str) -> Result<UserRecord, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (name, role) VALUES (?1, ?2) RETURNING *",
        )
        .bind(name)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to create user", e))?;

        Ok(record)
    }

    /// Register a session token for a user
    pub async fn create_session(&self, token: &str, user_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES (?1, ?2)")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_err("Failed to create session", e))?;

        Ok(())
    }
}

/// Challenge and plan repository
pub struct ChallengeRepository {
    pool: DbPool,
}

impl ChallengeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_plan(
        &self,
        name: &str,
        account_size: f64,
        profit_target_pct: f64,
        max_loss_pct: f64,
        daily_loss_pct: f64,
        duration_days: i64,
        level: i64,
    ) -> Result<ChallengePlanRecord, DatabaseError> {
        let record = sqlx::query_as::<_, ChallengePlanRecord>(
            r#"
            INSERT INTO challenge_plans (
                name, account_size, profit_target_pct, max_loss_pct, daily_loss_pct,
                duration_days, fee, profit_split, allowed_instruments, level
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0.0, 80.0, 'NSE', ?7)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(account_size)
        .bind(profit_target_pct)
        .bind(max_loss_pct)
        .bind(daily_loss_pct)
        .bind(duration_days)
        .bind(level)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to create plan", e))?;

        Ok(record)
    }

    pub async fn get_plan(&self, id: i64) -> Result<Option<ChallengePlanRecord>, DatabaseError> {
        let record =
            sqlx::query_as::<_, ChallengePlanRecord>("SELECT * FROM challenge_plans WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_err("Failed to get plan", e))?;

        Ok(record)
    }

    pub async fn create_challenge(
        &self,
        user_id: i64,
        plan_id: i64,
        status: &str,
        start_date: DateTime<Utc>,
    ) -> Result<UserChallengeRecord, DatabaseError> {
        let record = sqlx::query_as::<_, UserChallengeRecord>(
            r#"
            INSERT INTO user_challenges (user_id, plan_id, status, start_date)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(status)
        .bind(start_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to create challenge", e))?;

        debug!("Created challenge {} for user {}", record.id, user_id);
        Ok(record)
    }

    pub async fn get(&self, id: i64) -> Result<Option<UserChallengeRecord>, DatabaseError> {
        let record =
            sqlx::query_as::<_, UserChallengeRecord>("SELECT * FROM user_challenges WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_err("Failed to get challenge", e))?;

        Ok(record)
    }

    /// All challenges currently in ACTIVE status (evaluator sweep)
    pub async fn list_active(&self) -> Result<Vec<UserChallengeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, UserChallengeRecord>(
            "SELECT * FROM user_challenges WHERE status = 'ACTIVE' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_err("Failed to list active challenges", e))?;

        Ok(records)
    }

    pub async fn list_active_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<UserChallengeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, UserChallengeRecord>(
            "SELECT * FROM user_challenges WHERE user_id = ?1 AND status = 'ACTIVE' ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_err("Failed to list active challenges", e))?;

        Ok(records)
    }

    /// Update running pnl and drawdown after a trade-affecting operation
    pub async fn update_pnl(
        &self,
        id: i64,
        current_pnl: f64,
        max_drawdown: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE user_challenges SET current_pnl = ?1, max_drawdown = ?2 WHERE id = ?3",
        )
        .bind(current_pnl)
        .bind(max_drawdown)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_err("Failed to update challenge pnl", e))?;

        Ok(())
    }

    /// Persist an evaluation outcome; sets end_date only on a terminal status
    pub async fn apply_evaluation(
        &self,
        id: i64,
        status: &str,
        violation_count: i64,
        violation_details: &str,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE user_challenges
            SET status = ?1, violation_count = ?2, violation_details = ?3,
                end_date = COALESCE(?4, end_date)
            WHERE id = ?5
            "#,
        )
        .bind(status)
        .bind(violation_count)
        .bind(violation_details)
        .bind(end_date)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_err("Failed to apply evaluation", e))?;

        debug!("Applied evaluation to challenge {}: {}", id, status);
        Ok(())
    }

    pub async fn set_demo_credentials(
        &self,
        id: i64,
        credentials_json: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE user_challenges SET demo_account_credentials = ?1 WHERE id = ?2")
            .bind(credentials_json)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_err("Failed to set demo credentials", e))?;

        Ok(())
    }
}

/// Trade repository
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert an OPEN trade at the quoted entry price
    pub async fn create(&self, trade: CreateTrade) -> Result<TradeRecord, DatabaseError> {
        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trades (
                challenge_id, scrip, scrip_full_name, quantity, entry_price,
                trade_type, status, pnl, entry_time, auto_squared_off
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', 0.0, ?7, 0)
            RETURNING *
            "#,
        )
        .bind(trade.challenge_id)
        .bind(&trade.scrip)
        .bind(&trade.scrip_full_name)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(&trade.trade_type)
        .bind(trade.entry_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to create trade", e))?;

        debug!("Created trade {} on {}", record.id, record.scrip);
        Ok(record)
    }

    pub async fn get(&self, id: i64) -> Result<Option<TradeRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_err("Failed to get trade", e))?;

        Ok(record)
    }

    /// All OPEN trades for one challenge
    pub async fn open_for_challenge(
        &self,
        challenge_id: i64,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE challenge_id = ?1 AND status = 'OPEN' ORDER BY entry_time",
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_err("Failed to get open trades", e))?;

        Ok(records)
    }

    /// All OPEN trades, optionally scoped to one challenge (auto square-off)
    pub async fn all_open(
        &self,
        challenge_id: Option<i64>,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = match challenge_id {
            Some(id) => {
                sqlx::query_as::<_, TradeRecord>(
                    "SELECT * FROM trades WHERE status = 'OPEN' AND challenge_id = ?1 ORDER BY id",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TradeRecord>(
                    "SELECT * FROM trades WHERE status = 'OPEN' ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| query_err("Failed to get open trades", e))?;

        Ok(records)
    }

    /// Count trades entered within [start, end) for the daily cap check
    pub async fn count_entered_between(
        &self,
        challenge_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM trades
            WHERE challenge_id = ?1 AND entry_time >= ?2 AND entry_time < ?3
            "#,
        )
        .bind(challenge_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to count trades", e))?;

        Ok(count)
    }

    /// All trades for a challenge entered or exited within [start, end)
    pub async fn for_challenge_day(
        &self,
        challenge_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            r#"
            SELECT * FROM trades
            WHERE challenge_id = ?1
              AND ((entry_time >= ?2 AND entry_time < ?3)
                OR (exit_time IS NOT NULL AND exit_time >= ?2 AND exit_time < ?3))
            ORDER BY entry_time
            "#,
        )
        .bind(challenge_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_err("Failed to get day trades", e))?;

        Ok(records)
    }

    /// Total realized pnl over all CLOSED trades of a challenge
    pub async fn realized_pnl(&self, challenge_id: i64) -> Result<f64, DatabaseError> {
        let (total,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(pnl), 0.0) FROM trades WHERE challenge_id = ?1 AND status = 'CLOSED'",
        )
        .bind(challenge_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to sum realized pnl", e))?;

        Ok(total)
    }

    /// Close one OPEN trade; the status guard makes a second close a no-op
    pub async fn close(
        &self,
        id: i64,
        exit_price: f64,
        pnl: f64,
        exit_time: DateTime<Utc>,
        auto_squared_off: bool,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE trades
            SET status = 'CLOSED', exit_price = ?1, pnl = ?2, exit_time = ?3,
                auto_squared_off = ?4
            WHERE id = ?5 AND status = 'OPEN'
            "#,
        )
        .bind(exit_price)
        .bind(pnl)
        .bind(exit_time)
        .bind(auto_squared_off)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_err("Failed to close trade", e))?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Close a batch of trades atomically (auto square-off)
    pub async fn close_batch(
        &self,
        closures: &[(i64, f64, f64)], // (trade_id, exit_price, pnl)
        exit_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_err("Failed to begin transaction", e))?;

        for (id, exit_price, pnl) in closures {
            sqlx::query(
                r#"
                UPDATE trades
                SET status = 'CLOSED', exit_price = ?1, pnl = ?2, exit_time = ?3,
                    auto_squared_off = 1
                WHERE id = ?4 AND status = 'OPEN'
                "#,
            )
            .bind(exit_price)
            .bind(pnl)
            .bind(exit_time)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_err("Failed to close trade in batch", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_err("Failed to commit batch close", e))?;

        debug!("Closed {} trades in batch", closures.len());
        Ok(())
    }
}

/// Daily summary repository (derived cache)
pub struct SummaryRepository {
    pool: DbPool,
}

impl SummaryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert the summary for (challenge, day); every field is overwritten
    pub async fn upsert(&self, s: UpsertSummary) -> Result<DailySummaryRecord, DatabaseError> {
        let record = sqlx::query_as::<_, DailySummaryRecord>(
            r#"
            INSERT INTO daily_trade_summaries (
                challenge_id, date, total_trades, open_trades, closed_trades,
                realized_pnl, unrealized_pnl, capital_used, capital_available, day_pnl_pct
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(challenge_id, date) DO UPDATE SET
                total_trades = excluded.total_trades,
                open_trades = excluded.open_trades,
                closed_trades = excluded.closed_trades,
                realized_pnl = excluded.realized_pnl,
                unrealized_pnl = excluded.unrealized_pnl,
                capital_used = excluded.capital_used,
                capital_available = excluded.capital_available,
                day_pnl_pct = excluded.day_pnl_pct
            RETURNING *
            "#,
        )
        .bind(s.challenge_id)
        .bind(s.date)
        .bind(s.total_trades)
        .bind(s.open_trades)
        .bind(s.closed_trades)
        .bind(s.realized_pnl)
        .bind(s.unrealized_pnl)
        .bind(s.capital_used)
        .bind(s.capital_available)
        .bind(s.day_pnl_pct)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_err("Failed to upsert summary", e))?;

        Ok(record)
    }

    pub async fn latest(
        &self,
        challenge_id: i64,
    ) -> Result<Option<DailySummaryRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, DailySummaryRecord>(
            "SELECT * FROM daily_trade_summaries WHERE challenge_id = ?1 ORDER BY date DESC LIMIT 1",
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_err("Failed to get latest summary", e))?;

        Ok(record)
    }
}

/// Challenge metrics repository
pub struct MetricsRepository {
    pool: DbPool,
}

impl MetricsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn for_challenge(
        &self,
        challenge_id: i64,
    ) -> Result<Vec<ChallengeMetricsRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, ChallengeMetricsRecord>(
            "SELECT * FROM challenge_metrics WHERE challenge_id = ?1 ORDER BY date",
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_err("Failed to get metrics", e))?;

        Ok(records)
    }

    /// Returns `None` when a row for the same (challenge, day) already
    /// exists, so concurrent backfills of the same day are harmless.
    pub async fn insert(
        &self,
        m: CreateMetrics,
    ) -> Result<Option<ChallengeMetricsRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, ChallengeMetricsRecord>(
            r#"
            INSERT INTO challenge_metrics (
                challenge_id, date, daily_pnl, cumulative_pnl, trades_count,
                win_rate, max_drawdown, profit_target, violations
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(challenge_id, date) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(m.challenge_id)
        .bind(m.date)
        .bind(m.daily_pnl)
        .bind(m.cumulative_pnl)
        .bind(m.trades_count)
        .bind(m.win_rate)
        .bind(m.max_drawdown)
        .bind(m.profit_target)
        .bind(m.violations)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_err("Failed to insert metrics", e))?;

        Ok(record)
    }
}

/// Fallback quote store (used when the broker quote cannot be resolved)
pub struct MockQuoteRepository {
    pool: DbPool,
}

impl MockQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, scrip: &str) -> Result<Option<MockQuoteRecord>, DatabaseError> {
        let record =
            sqlx::query_as::<_, MockQuoteRecord>("SELECT * FROM mock_market_data WHERE scrip = ?1")
                .bind(scrip)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_err("Failed to get mock quote", e))?;

        Ok(record)
    }

    pub async fn upsert(
        &self,
        scrip: &str,
        ltp: f64,
        scrip_full_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO mock_market_data (scrip, ltp, scrip_full_name)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(scrip) DO UPDATE SET ltp = excluded.ltp,
                scrip_full_name = excluded.scrip_full_name
            "#,
        )
        .bind(scrip)
        .bind(ltp)
        .bind(scrip_full_name)
        .execute(&self.pool)
        .await
        .map_err(|e| query_err("Failed to upsert mock quote", e))?;

        Ok(())
    }
}

/// Broker session cache (single row)
pub struct BrokerSessionRepository {
    pool: DbPool,
}

impl BrokerSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<Option<BrokerSessionRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, BrokerSessionRecord>(
            "SELECT * FROM broker_sessions WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_err("Failed to get broker session", e))?;

        Ok(record)
    }

    pub async fn upsert(
        &self,
        jwt_token: &str,
        refresh_token: &str,
        feed_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO broker_sessions (id, jwt_token, refresh_token, feed_token, expires_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                jwt_token = excluded.jwt_token,
                refresh_token = excluded.refresh_token,
                feed_token = excluded.feed_token,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(jwt_token)
        .bind(refresh_token)
        .bind(feed_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| query_err("Failed to upsert broker session", e))?;

        Ok(())
    }
}

/// Whether any metrics rows exist for a challenge (gates the backfill)
pub async fn metrics_exist(
    pool: &DbPool,
    challenge_id: i64,
) -> Result<bool, DatabaseError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM challenge_metrics WHERE challenge_id = ?1")
            .bind(challenge_id)
            .fetch_one(pool)
            .await
            .map_err(|e| query_err("Failed to count metrics", e))?;

    Ok(count > 0)
}
