//! Daily metric rows consumed by the challenge evaluator.

use crate::persistence::models::ChallengeMetricsRecord;
use chrono::NaiveDate;

/// One day's accumulated metrics for a challenge
#[derive(Debug, Clone)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub daily_pnl: f64,
    pub cumulative_pnl: f64,
    pub max_drawdown: f64,
}

impl From<&ChallengeMetricsRecord> for DailyMetric {
    fn from(r: &ChallengeMetricsRecord) -> Self {
        DailyMetric {
            date: r.date,
            daily_pnl: r.daily_pnl,
            cumulative_pnl: r.cumulative_pnl,
            max_drawdown: r.max_drawdown,
        }
    }
}
