//! Challenge plan and user challenge entities.
//!
//! A `ChallengePlan` is a static tier definition; a `UserChallenge` is one
//! user's attempt at it. Plan limits are expressed as percentages of the
//! account size and converted to absolute amounts here.

use crate::persistence::models::{ChallengePlanRecord, UserChallengeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallengeStatus {
    Pending,
    Active,
    Passed,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "PENDING",
            ChallengeStatus::Active => "ACTIVE",
            ChallengeStatus::Passed => "PASSED",
            ChallengeStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Passed | ChallengeStatus::Failed)
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChallengeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ChallengeStatus::Pending),
            "ACTIVE" => Ok(ChallengeStatus::Active),
            "PASSED" => Ok(ChallengeStatus::Passed),
            "FAILED" => Ok(ChallengeStatus::Failed),
            other => Err(format!("invalid challenge status: {}", other)),
        }
    }
}

/// Static tier definition
#[derive(Debug, Clone)]
pub struct ChallengePlan {
    pub id: i64,
    pub account_size: f64,
    pub profit_target_pct: f64,
    pub max_loss_pct: f64,
    pub daily_loss_pct: f64,
    pub duration_days: i64,
    pub level: i64,
}

impl ChallengePlan {
    pub fn profit_target_amount(&self) -> f64 {
        self.account_size * self.profit_target_pct / 100.0
    }

    pub fn max_loss_amount(&self) -> f64 {
        self.account_size * self.max_loss_pct / 100.0
    }

    pub fn daily_loss_limit(&self) -> f64 {
        self.account_size * self.daily_loss_pct / 100.0
    }
}

impl From<&ChallengePlanRecord> for ChallengePlan {
    fn from(r: &ChallengePlanRecord) -> Self {
        ChallengePlan {
            id: r.id,
            account_size: r.account_size,
            profit_target_pct: r.profit_target_pct,
            max_loss_pct: r.max_loss_pct,
            daily_loss_pct: r.daily_loss_pct,
            duration_days: r.duration_days,
            level: r.level,
        }
    }
}

/// Domain view of one user's challenge attempt
#[derive(Debug, Clone)]
pub struct UserChallenge {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub status: ChallengeStatus,
    pub start_date: DateTime<Utc>,
    pub current_pnl: f64,
    pub max_drawdown: f64,
}

impl TryFrom<&UserChallengeRecord> for UserChallenge {
    type Error = String;

    fn try_from(r: &UserChallengeRecord) -> Result<Self, Self::Error> {
        Ok(UserChallenge {
            id: r.id,
            user_id: r.user_id,
            plan_id: r.plan_id,
            status: r.status.parse()?,
            start_date: r.start_date,
            current_pnl: r.current_pnl,
            max_drawdown: r.max_drawdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> ChallengePlan {
        ChallengePlan {
            id: 1,
            account_size: 100000.0,
            profit_target_pct: 10.0,
            max_loss_pct: 10.0,
            daily_loss_pct: 5.0,
            duration_days: 30,
            level: 1,
        }
    }

    #[test]
    fn test_plan_amounts() {
        let p = plan();
        assert_eq!(p.profit_target_amount(), 10000.0);
        assert_eq!(p.max_loss_amount(), 10000.0);
        assert_eq!(p.daily_loss_limit(), 5000.0);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "ACTIVE".parse::<ChallengeStatus>().unwrap(),
            ChallengeStatus::Active
        );
        assert!(ChallengeStatus::Passed.is_terminal());
        assert!(!ChallengeStatus::Active.is_terminal());
        assert!("LIVE".parse::<ChallengeStatus>().is_err());
    }
}
