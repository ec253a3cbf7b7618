//! Database Models
//!
//! Persistent data structures for users, challenge plans, user challenges,
//! trades, metrics, summaries and the cached broker session.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record (identity is owned by the auth collaborator; read-only here)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub role: String, // TRADER | ADMIN
}

/// Static challenge tier definition, immutable once referenced
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChallengePlanRecord {
    pub id: i64,
    pub name: String,
    pub account_size: f64,
    pub profit_target_pct: f64,
    pub max_loss_pct: f64,
    pub daily_loss_pct: f64,
    pub duration_days: i64,
    pub fee: f64,
    pub profit_split: f64,
    pub allowed_instruments: String, // comma-separated segment list
    pub level: i64,                  // 1..3
}

/// One user's attempt at a plan
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserChallengeRecord {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub status: String, // PENDING | ACTIVE | PASSED | FAILED
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub current_pnl: f64,
    pub max_drawdown: f64,
    pub violation_count: i64,
    pub violation_details: Option<String>, // JSON array
    pub demo_account_credentials: Option<String>, // JSON {username, password}
}

/// Simulated trade record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub challenge_id: i64,
    pub scrip: String,
    pub scrip_full_name: Option<String>,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub trade_type: String, // BUY | SELL
    pub status: String,     // OPEN | CLOSED
    pub pnl: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub auto_squared_off: bool,
}

/// One metrics row per (challenge, calendar day)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChallengeMetricsRecord {
    pub id: i64,
    pub challenge_id: i64,
    pub date: NaiveDate,
    pub daily_pnl: f64,
    pub cumulative_pnl: f64,
    pub trades_count: i64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub profit_target: f64,
    pub violations: i64,
}

/// Derived daily rollup, fully recomputed from trades on every write
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailySummaryRecord {
    pub id: i64,
    pub challenge_id: i64,
    pub date: NaiveDate,
    pub total_trades: i64,
    pub open_trades: i64,
    pub closed_trades: i64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub capital_used: f64,
    pub capital_available: f64,
    pub day_pnl_pct: f64,
}

/// Fallback quote store row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MockQuoteRecord {
    pub scrip: String,
    pub ltp: f64,
    pub scrip_full_name: Option<String>,
}

/// Cached broker day-session tokens (single row, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BrokerSessionRecord {
    pub id: i64,
    pub jwt_token: String,
    pub refresh_token: String,
    pub feed_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Create trade input
#[derive(Debug, Clone)]
pub struct CreateTrade {
    pub challenge_id: i64,
    pub scrip: String,
    pub scrip_full_name: Option<String>,
    pub quantity: f64,
    pub entry_price: f64,
    pub trade_type: String,
    pub entry_time: DateTime<Utc>,
}

/// Create metrics row input
#[derive(Debug, Clone)]
pub struct CreateMetrics {
    pub challenge_id: i64,
    pub date: NaiveDate,
    pub daily_pnl: f64,
    pub cumulative_pnl: f64,
    pub trades_count: i64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub profit_target: f64,
    pub violations: i64,
}

/// Daily summary upsert input (id-less; keyed by challenge_id + date)
#[derive(Debug, Clone)]
pub struct UpsertSummary {
    pub challenge_id: i64,
    pub date: NaiveDate,
    pub total_trades: i64,
    pub open_trades: i64,
    pub closed_trades: i64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub capital_used: f64,
    pub capital_available: f64,
    pub day_pnl_pct: f64,
}
