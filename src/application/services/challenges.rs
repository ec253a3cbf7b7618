//! Challenge Service
//!
//! Runs the rule engine over challenges, persists verdicts, and assembles the
//! status view a trader sees: plan limits, progress, per-day metrics, the
//! latest summary, and the demo account credentials issued on first read.

use crate::domain::entities::challenge::{ChallengePlan, ChallengeStatus, UserChallenge};
use crate::domain::entities::metrics::DailyMetric;
use crate::domain::errors::ApiError;
use crate::domain::services::capital::round2;
use crate::domain::services::evaluator::{evaluate, Evaluation};
use crate::domain::services::market_time::local_day;
use crate::persistence::models::{
    ChallengeMetricsRecord, ChallengePlanRecord, CreateMetrics, DailySummaryRecord,
    UserChallengeRecord,
};
use crate::persistence::repository::{
    metrics_exist, ChallengeRepository, MetricsRepository, SummaryRepository,
};
use crate::persistence::DbPool;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::trading::Caller;

/// One challenge's verdict, as returned by the evaluate endpoints
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationView {
    pub challenge_id: i64,
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub evaluated_at: DateTime<Utc>,
    pub persisted: bool,
}

/// Full status payload for one challenge
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeStatusView {
    pub challenge: UserChallengeRecord,
    pub plan: ChallengePlanRecord,
    pub evaluation: Evaluation,
    pub metrics: Vec<ChallengeMetricsRecord>,
    pub latest_summary: Option<DailySummaryRecord>,
    pub demo_account_credentials: Option<serde_json::Value>,
}

/// Which challenges one evaluate call covers
#[derive(Debug, Clone, Copy)]
pub enum EvaluateTarget {
    One(i64),
    User(i64),
    AllActive,
}

impl EvaluateTarget {
    pub fn from_selectors(
        challenge_id: Option<i64>,
        user_id: Option<i64>,
    ) -> Result<Self, ApiError> {
        match (challenge_id, user_id) {
            (Some(_), Some(_)) => Err(ApiError::Validation(
                "pass either challenge_id or user_id, not both".to_string(),
            )),
            (Some(id), None) => Ok(Self::One(id)),
            (None, Some(id)) => Ok(Self::User(id)),
            (None, None) => Ok(Self::AllActive),
        }
    }
}

#[derive(Clone)]
pub struct ChallengeService {
    pool: DbPool,
    exchange_offset_minutes: i32,
}

impl ChallengeService {
    pub fn new(pool: DbPool, exchange_offset_minutes: i32) -> Self {
        Self {
            pool,
            exchange_offset_minutes,
        }
    }

    /// Evaluate one challenge, one user's ACTIVE challenges, or every ACTIVE
    /// challenge. Non-admin callers may only target what they own.
    pub async fn evaluate_challenges(
        &self,
        caller: &Caller,
        target: EvaluateTarget,
        persist: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationView>, ApiError> {
        let challenges = ChallengeRepository::new(self.pool.clone());
        let records = match target {
            EvaluateTarget::One(id) => {
                let record = challenges
                    .get(id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound("challenge not found".to_string()))?;
                if !caller.is_admin && record.user_id != caller.user_id {
                    return Err(ApiError::Forbidden(
                        "challenge belongs to another user".to_string(),
                    ));
                }
                vec![record]
            }
            EvaluateTarget::User(user_id) => {
                if !caller.is_admin && user_id != caller.user_id {
                    return Err(ApiError::Forbidden(
                        "challenges belong to another user".to_string(),
                    ));
                }
                challenges.list_active_for_user(user_id).await?
            }
            EvaluateTarget::AllActive => {
                if !caller.is_admin {
                    return Err(ApiError::Forbidden(
                        "bulk evaluation requires admin access".to_string(),
                    ));
                }
                challenges.list_active().await?
            }
        };

        let mut views = Vec::with_capacity(records.len());
        for record in records {
            views.push(self.evaluate_record(&record, persist, now).await?);
        }
        Ok(views)
    }

    async fn evaluate_record(
        &self,
        record: &UserChallengeRecord,
        persist: bool,
        now: DateTime<Utc>,
    ) -> Result<EvaluationView, ApiError> {
        let (challenge, plan) = self.load_pair(record).await?;
        let metrics = self.load_metrics(record.id).await?;
        let evaluation = evaluate(&challenge, &plan, &metrics, now);

        let persisted = persist && challenge.status == ChallengeStatus::Active;
        if persisted {
            let details = serde_json::to_string(&evaluation.violations)
                .map_err(ApiError::internal)?;
            let end_date = evaluation.status.is_terminal().then_some(now);
            ChallengeRepository::new(self.pool.clone())
                .apply_evaluation(
                    record.id,
                    evaluation.status.as_str(),
                    evaluation.violations.len() as i64,
                    &details,
                    end_date,
                )
                .await?;
            if evaluation.status.is_terminal() {
                info!(
                    challenge_id = record.id,
                    status = evaluation.status.as_str(),
                    "challenge reached a terminal verdict"
                );
            }
        }

        Ok(EvaluationView {
            challenge_id: record.id,
            evaluation,
            evaluated_at: now,
            persisted,
        })
    }

    /// Status view for one challenge. First read of an ACTIVE challenge with
    /// no recorded metrics backfills a plausible history so the dashboard has
    /// something to draw; first read also issues demo account credentials.
    pub async fn status(
        &self,
        caller: &Caller,
        challenge_id: i64,
    ) -> Result<ChallengeStatusView, ApiError> {
        let challenges = ChallengeRepository::new(self.pool.clone());
        let mut record = challenges
            .get(challenge_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("challenge not found".to_string()))?;
        if !caller.is_admin && record.user_id != caller.user_id {
            return Err(ApiError::Forbidden(
                "challenge belongs to another user".to_string(),
            ));
        }

        let (challenge, plan) = self.load_pair(&record).await?;
        let plan_record = challenges
            .get_plan(record.plan_id)
            .await?
            .ok_or_else(|| ApiError::internal("challenge references a missing plan"))?;

        let now = Utc::now();
        if challenge.status == ChallengeStatus::Active
            && !metrics_exist(&self.pool, record.id).await?
        {
            self.backfill_metrics(&record, &plan, now).await?;
        }

        if record.demo_account_credentials.is_none() {
            let credentials = issue_demo_credentials(record.id);
            let json = serde_json::to_string(&credentials).map_err(ApiError::internal)?;
            challenges.set_demo_credentials(record.id, &json).await?;
            record.demo_account_credentials = Some(json);
            debug!(challenge_id = record.id, "issued demo account credentials");
        }

        let metric_records = MetricsRepository::new(self.pool.clone())
            .for_challenge(record.id)
            .await?;
        let metrics: Vec<DailyMetric> = metric_records.iter().map(DailyMetric::from).collect();
        let evaluation = evaluate(&challenge, &plan, &metrics, now);

        let latest_summary = SummaryRepository::new(self.pool.clone())
            .latest(record.id)
            .await?;
        let demo_account_credentials = record
            .demo_account_credentials
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok());

        Ok(ChallengeStatusView {
            challenge: record,
            plan: plan_record,
            evaluation,
            metrics: metric_records,
            latest_summary,
            demo_account_credentials,
        })
    }

    async fn load_pair(
        &self,
        record: &UserChallengeRecord,
    ) -> Result<(UserChallenge, ChallengePlan), ApiError> {
        let challenge = UserChallenge::try_from(record).map_err(ApiError::internal)?;
        let plan_record = ChallengeRepository::new(self.pool.clone())
            .get_plan(record.plan_id)
            .await?
            .ok_or_else(|| ApiError::internal("challenge references a missing plan"))?;
        Ok((challenge, ChallengePlan::from(&plan_record)))
    }

    async fn load_metrics(&self, challenge_id: i64) -> Result<Vec<DailyMetric>, ApiError> {
        let records = MetricsRepository::new(self.pool.clone())
            .for_challenge(challenge_id)
            .await?;
        Ok(records.iter().map(DailyMetric::from).collect())
    }

    /// Write one synthetic metrics row per elapsed local day since the
    /// challenge started, up to and including today.
    async fn backfill_metrics(
        &self,
        record: &UserChallengeRecord,
        plan: &ChallengePlan,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let start = local_day(record.start_date, self.exchange_offset_minutes);
        let today = local_day(now, self.exchange_offset_minutes);
        let days = (today - start).num_days().max(0) + 1;

        // ThreadRng is !Send, so draw every sample up front instead of
        // keeping it alive across the insert awaits.
        let mut rows = Vec::with_capacity(days as usize);
        {
            let mut rng = rand::thread_rng();
            let mut cumulative = 0.0;
            let mut max_drawdown: f64 = 0.0;
            for offset in 0..days {
                let daily_pnl = round2(plan.account_size * rng.gen_range(-0.012..0.018));
                cumulative = round2(cumulative + daily_pnl);
                if cumulative < 0.0 {
                    max_drawdown = max_drawdown.max(-cumulative);
                }
                rows.push(CreateMetrics {
                    challenge_id: record.id,
                    date: start + Duration::days(offset),
                    daily_pnl,
                    cumulative_pnl: cumulative,
                    trades_count: rng.gen_range(1..12),
                    win_rate: round2(rng.gen_range(40.0..70.0)),
                    max_drawdown,
                    profit_target: plan.profit_target_amount(),
                    violations: 0,
                });
            }
        }

        let metrics = MetricsRepository::new(self.pool.clone());
        for row in rows {
            metrics.insert(row).await?;
        }
        debug!(
            challenge_id = record.id,
            days, "backfilled synthetic metrics"
        );
        Ok(())
    }
}

fn issue_demo_credentials(challenge_id: i64) -> serde_json::Value {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    serde_json::json!({
        "username": format!("demo_{challenge_id}"),
        "password": hex::encode(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::repository::SessionRepository;
    use crate::persistence::init_database;

    async fn setup() -> (DbPool, ChallengeService, Caller, UserChallengeRecord) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let sessions = SessionRepository::new(pool.clone());
        let user = sessions.create_user("bob", "TRADER").await.unwrap();
        let challenges = ChallengeRepository::new(pool.clone());
        let plan = challenges
            .create_plan("Starter", 100_000.0, 8.0, 10.0, 4.0, 30, 1)
            .await
            .unwrap();
        let challenge = challenges
            .create_challenge(user.id, plan.id, "ACTIVE", Utc::now())
            .await
            .unwrap();
        let service = ChallengeService::new(pool.clone(), 330);
        let caller = Caller {
            user_id: user.id,
            is_admin: false,
        };
        (pool, service, caller, challenge)
    }

    #[tokio::test]
    async fn test_preview_does_not_persist() {
        let (pool, service, caller, challenge) = setup().await;
        let metrics = MetricsRepository::new(pool.clone());
        metrics
            .insert(CreateMetrics {
                challenge_id: challenge.id,
                date: local_day(Utc::now(), 330),
                daily_pnl: -15_000.0,
                cumulative_pnl: -15_000.0,
                trades_count: 3,
                win_rate: 20.0,
                max_drawdown: 15_000.0,
                profit_target: 8_000.0,
                violations: 0,
            })
            .await
            .unwrap();

        let views = service
            .evaluate_challenges(&caller, EvaluateTarget::One(challenge.id), false, Utc::now())
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].evaluation.failed);
        assert!(!views[0].persisted);

        let stored = ChallengeRepository::new(pool)
            .get(challenge.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "ACTIVE");
    }

    #[tokio::test]
    async fn test_persisted_failure_sets_end_date() {
        let (pool, service, caller, challenge) = setup().await;
        MetricsRepository::new(pool.clone())
            .insert(CreateMetrics {
                challenge_id: challenge.id,
                date: local_day(Utc::now(), 330),
                daily_pnl: -15_000.0,
                cumulative_pnl: -15_000.0,
                trades_count: 3,
                win_rate: 20.0,
                max_drawdown: 15_000.0,
                profit_target: 8_000.0,
                violations: 0,
            })
            .await
            .unwrap();

        let views = service
            .evaluate_challenges(&caller, EvaluateTarget::One(challenge.id), true, Utc::now())
            .await
            .unwrap();
        assert!(views[0].persisted);

        let stored = ChallengeRepository::new(pool)
            .get(challenge.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "FAILED");
        assert!(stored.end_date.is_some());
        assert!(stored.violation_count >= 1);
        assert!(stored.violation_details.unwrap().contains("MAX_LOSS"));
    }

    #[tokio::test]
    async fn test_bulk_evaluation_requires_admin() {
        let (_pool, service, caller, _challenge) = setup().await;
        let err = service
            .evaluate_challenges(&caller, EvaluateTarget::AllActive, false, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_user_target_covers_own_active_challenges_only() {
        let (pool, service, caller, challenge) = setup().await;

        let views = service
            .evaluate_challenges(
                &caller,
                EvaluateTarget::User(caller.user_id),
                false,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].challenge_id, challenge.id);

        // A trader cannot sweep someone else's challenges
        let err = service
            .evaluate_challenges(&caller, EvaluateTarget::User(999), false, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // An admin can, and an empty book is an empty result
        let admin = Caller {
            user_id: 0,
            is_admin: true,
        };
        let other = SessionRepository::new(pool.clone())
            .create_user("carol", "TRADER")
            .await
            .unwrap();
        let views = service
            .evaluate_challenges(&admin, EvaluateTarget::User(other.id), false, Utc::now())
            .await
            .unwrap();
        assert!(views.is_empty());
    }

    #[test]
    fn test_evaluate_target_rejects_both_selectors() {
        let err = EvaluateTarget::from_selectors(Some(1), Some(2)).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(matches!(
            EvaluateTarget::from_selectors(Some(1), None),
            Ok(EvaluateTarget::One(1))
        ));
        assert!(matches!(
            EvaluateTarget::from_selectors(None, Some(7)),
            Ok(EvaluateTarget::User(7))
        ));
        assert!(matches!(
            EvaluateTarget::from_selectors(None, None),
            Ok(EvaluateTarget::AllActive)
        ));
    }

    #[tokio::test]
    async fn test_status_backfills_metrics_and_issues_credentials() {
        let (pool, service, caller, challenge) = setup().await;

        let view = service.status(&caller, challenge.id).await.unwrap();
        assert!(!view.metrics.is_empty());
        let creds = view.demo_account_credentials.unwrap();
        assert_eq!(
            creds["username"].as_str().unwrap(),
            format!("demo_{}", challenge.id)
        );
        assert_eq!(creds["password"].as_str().unwrap().len(), 16);

        // Second read reuses both the metrics and the credentials
        let again = service.status(&caller, challenge.id).await.unwrap();
        assert_eq!(again.metrics.len(), view.metrics.len());
        assert_eq!(again.demo_account_credentials.unwrap(), creds);

        let stored = ChallengeRepository::new(pool)
            .get(challenge.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.demo_account_credentials.is_some());
    }

    // Handlers spawn across threads, so the status future must stay Send
    // even while it backfills (ThreadRng is not).
    #[tokio::test]
    async fn test_status_runs_on_a_spawned_task() {
        let (_pool, service, caller, challenge) = setup().await;
        let challenge_id = challenge.id;

        let view = tokio::spawn(async move { service.status(&caller, challenge_id).await })
            .await
            .unwrap()
            .unwrap();
        assert!(!view.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_status_rejects_foreign_challenge() {
        let (_pool, service, _caller, challenge) = setup().await;
        let stranger = Caller {
            user_id: 999,
            is_admin: false,
        };
        let err = service.status(&stranger, challenge.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
