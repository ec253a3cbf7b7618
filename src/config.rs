//! Application configuration loaded from the environment.

use crate::infrastructure::broker::BrokerConfig;
use crate::infrastructure::price_stream::StreamSettings;
use std::time::Duration;
use zeroize::Zeroizing;

/// Default number of trades allowed per challenge per exchange-local day
pub const DEFAULT_DAILY_TRADE_CAP: i64 = 100;

/// IST, the exchange-local offset, in minutes
pub const DEFAULT_EXCHANGE_OFFSET_MINUTES: i32 = 330;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Pre-shared secret authorizing the cron auto-square-off path; unset
    /// means that path always denies
    pub cron_secret: Option<String>,
    pub daily_trade_cap: i64,
    pub exchange_offset_minutes: i32,
    pub default_exchange: String,
    /// Exchange-local hour at which the background square-off task fires;
    /// None disables the task
    pub square_off_hour: Option<u32>,
    pub instrument_cache_ttl: Duration,
    pub instrument_cache_capacity: usize,
    pub stream: StreamSettings,
    pub broker: BrokerConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// A UTC offset must stay within a day for `FixedOffset` to accept it;
/// out-of-range values fall back to the default.
fn valid_offset(minutes: i32) -> i32 {
    if minutes.abs() < 24 * 60 {
        minutes
    } else {
        tracing::warn!(
            minutes,
            "EXCHANGE_UTC_OFFSET_MINUTES out of range, using default"
        );
        DEFAULT_EXCHANGE_OFFSET_MINUTES
    }
}

impl AppConfig {
    /// Load from environment variables, with working defaults for local runs
    pub fn from_env() -> Self {
        let exchange_offset_minutes = valid_offset(env_parse(
            "EXCHANGE_UTC_OFFSET_MINUTES",
            DEFAULT_EXCHANGE_OFFSET_MINUTES,
        ));

        let broker = BrokerConfig {
            api_base: std::env::var("BROKER_API_BASE")
                .unwrap_or_else(|_| "https://apiconnect.broker.example".to_string()),
            api_key: env_opt("BROKER_API_KEY"),
            client_code: env_opt("BROKER_CLIENT_CODE"),
            mpin: env_opt("BROKER_MPIN").map(Zeroizing::new),
            totp_secret: env_opt("BROKER_TOTP_SECRET").map(Zeroizing::new),
            timeout_secs: env_parse("BROKER_TIMEOUT_SECS", 5),
            exchange_offset_minutes,
        };

        AppConfig {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/propdesk.db".to_string()),
            cron_secret: env_opt("CRON_SECRET"),
            daily_trade_cap: env_parse("DAILY_TRADE_CAP", DEFAULT_DAILY_TRADE_CAP),
            exchange_offset_minutes,
            default_exchange: std::env::var("DEFAULT_EXCHANGE").unwrap_or_else(|_| "NSE".to_string()),
            square_off_hour: env_opt("SQUARE_OFF_HOUR").and_then(|s| s.parse().ok()),
            instrument_cache_ttl: Duration::from_secs(env_parse(
                "INSTRUMENT_CACHE_TTL_SECS",
                6 * 60 * 60,
            )),
            instrument_cache_capacity: env_parse("INSTRUMENT_CACHE_CAPACITY", 512),
            stream: StreamSettings {
                poll_interval: Duration::from_secs(env_parse("STREAM_POLL_SECS", 2)),
                backoff_step: Duration::from_secs(env_parse("STREAM_BACKOFF_STEP_SECS", 1)),
                max_backoff: Duration::from_secs(env_parse("STREAM_MAX_BACKOFF_SECS", 5)),
            },
            broker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only checks names not commonly set in CI environments
        let config = AppConfig::from_env();
        assert_eq!(config.daily_trade_cap, DEFAULT_DAILY_TRADE_CAP);
        assert_eq!(config.default_exchange, "NSE");
        assert_eq!(config.exchange_offset_minutes, DEFAULT_EXCHANGE_OFFSET_MINUTES);
        assert_eq!(config.stream.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_default() {
        assert_eq!(valid_offset(330), 330);
        assert_eq!(valid_offset(-600), -600);
        assert_eq!(valid_offset(1440), DEFAULT_EXCHANGE_OFFSET_MINUTES);
        assert_eq!(valid_offset(-100_000), DEFAULT_EXCHANGE_OFFSET_MINUTES);
    }
}
