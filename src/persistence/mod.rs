//! Persistence Layer
//!
//! SQLite-backed storage for challenge plans, user challenges, trades, daily
//! metrics and summaries, plus the cached broker session. Async access via sqlx.
//!
//! # Schema notes
//! - `daily_trade_summaries` is a derived rollup, unique per (challenge_id, date),
//!   always recomputed whole from `trades` rows.
//! - `trades` rows are closed at most once; the UPDATE carries a
//!   `WHERE status = 'OPEN'` guard.
//! - `broker_sessions` holds a single row (id = 1) with the day-scoped JWT.

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
///
/// # Arguments
/// - `database_url`: SQLite URL (e.g., "sqlite://data/propdesk.db" or "sqlite::memory:")
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    // In-memory databases are per-connection; more than one pooled
    // connection would see an empty schema
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");

    Ok(pool)
}

async fn migrate(pool: &DbPool, what: &str, sql: &str) -> Result<(), DatabaseError> {
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create {}: {}", what, e)))?;
    Ok(())
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    migrate(
        pool,
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('TRADER', 'ADMIN'))
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "challenge_plans table",
        r#"
        CREATE TABLE IF NOT EXISTS challenge_plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            account_size REAL NOT NULL,
            profit_target_pct REAL NOT NULL,
            max_loss_pct REAL NOT NULL,
            daily_loss_pct REAL NOT NULL,
            duration_days INTEGER NOT NULL,
            fee REAL NOT NULL,
            profit_split REAL NOT NULL,
            allowed_instruments TEXT NOT NULL,
            level INTEGER NOT NULL CHECK(level BETWEEN 1 AND 3)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "user_challenges table",
        r#"
        CREATE TABLE IF NOT EXISTS user_challenges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            plan_id INTEGER NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('PENDING', 'ACTIVE', 'PASSED', 'FAILED')),
            start_date DATETIME NOT NULL,
            end_date DATETIME,
            current_pnl REAL NOT NULL DEFAULT 0.0,
            max_drawdown REAL NOT NULL DEFAULT 0.0,
            violation_count INTEGER NOT NULL DEFAULT 0,
            violation_details TEXT,
            demo_account_credentials TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id),
            FOREIGN KEY (plan_id) REFERENCES challenge_plans(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "trades table",
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id INTEGER NOT NULL,
            scrip TEXT NOT NULL,
            scrip_full_name TEXT,
            quantity REAL NOT NULL,
            entry_price REAL NOT NULL,
            exit_price REAL,
            trade_type TEXT NOT NULL CHECK(trade_type IN ('BUY', 'SELL')),
            status TEXT NOT NULL CHECK(status IN ('OPEN', 'CLOSED')),
            pnl REAL NOT NULL DEFAULT 0.0,
            entry_time DATETIME NOT NULL,
            exit_time DATETIME,
            auto_squared_off BOOLEAN NOT NULL DEFAULT 0,
            FOREIGN KEY (challenge_id) REFERENCES user_challenges(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "challenge_metrics table",
        r#"
        CREATE TABLE IF NOT EXISTS challenge_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id INTEGER NOT NULL,
            date DATE NOT NULL,
            daily_pnl REAL NOT NULL,
            cumulative_pnl REAL NOT NULL,
            trades_count INTEGER NOT NULL DEFAULT 0,
            win_rate REAL NOT NULL DEFAULT 0.0,
            max_drawdown REAL NOT NULL DEFAULT 0.0,
            profit_target REAL NOT NULL DEFAULT 0.0,
            violations INTEGER NOT NULL DEFAULT 0,
            UNIQUE(challenge_id, date),
            FOREIGN KEY (challenge_id) REFERENCES user_challenges(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "daily_trade_summaries table",
        r#"
        CREATE TABLE IF NOT EXISTS daily_trade_summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id INTEGER NOT NULL,
            date DATE NOT NULL,
            total_trades INTEGER NOT NULL,
            open_trades INTEGER NOT NULL,
            closed_trades INTEGER NOT NULL,
            realized_pnl REAL NOT NULL,
            unrealized_pnl REAL NOT NULL,
            capital_used REAL NOT NULL,
            capital_available REAL NOT NULL,
            day_pnl_pct REAL NOT NULL,
            UNIQUE(challenge_id, date),
            FOREIGN KEY (challenge_id) REFERENCES user_challenges(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "mock_market_data table",
        r#"
        CREATE TABLE IF NOT EXISTS mock_market_data (
            scrip TEXT PRIMARY KEY,
            ltp REAL NOT NULL,
            scrip_full_name TEXT
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "broker_sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS broker_sessions (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            jwt_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            feed_token TEXT NOT NULL,
            expires_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "trades challenge index",
        "CREATE INDEX IF NOT EXISTS idx_trades_challenge ON trades(challenge_id, status)",
    )
    .await?;

    migrate(
        pool,
        "trades entry_time index",
        "CREATE INDEX IF NOT EXISTS idx_trades_entry_time ON trades(entry_time)",
    )
    .await?;

    migrate(
        pool,
        "challenge status index",
        "CREATE INDEX IF NOT EXISTS idx_challenges_status ON user_challenges(status)",
    )
    .await?;

    info!("Database migrations completed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('users', 'sessions', 'challenge_plans', 'user_challenges', 'trades', \
              'challenge_metrics', 'daily_trade_summaries', 'mock_market_data', 'broker_sessions')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 9);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
