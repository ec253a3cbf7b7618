//! Challenge Evaluator
//!
//! Pure rule engine deciding PASSED / FAILED / ACTIVE from a challenge's plan
//! limits and its accumulated daily metrics. No side effects; callers persist
//! the outcome.
//!
//! Rules run as an ordered list folded over an accumulator. The first rule to
//! produce a terminal outcome fixes the status and the reason; later rules
//! still run and append violations, but never overturn the outcome. The clock
//! is an explicit argument so the function stays deterministic.

use crate::domain::entities::challenge::{ChallengePlan, ChallengeStatus, UserChallenge};
use crate::domain::entities::metrics::DailyMetric;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    #[serde(rename = "DURATION_EXPIRED")]
    DurationExpired,
    #[serde(rename = "MAX_LOSS")]
    MaxLoss,
    #[serde(rename = "DAILY_LOSS")]
    DailyLoss,
}

/// A recorded rule violation; serialized into `violation_details`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: String,
    pub date: Option<NaiveDate>,
    pub message: String,
}

impl Violation {
    fn critical(kind: ViolationKind, date: Option<NaiveDate>, message: String) -> Self {
        Violation {
            kind,
            severity: "CRITICAL".to_string(),
            date,
            message,
        }
    }
}

/// Evaluation result
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub status: ChallengeStatus,
    pub passed: bool,
    pub failed: bool,
    pub reason: Option<String>,
    pub violations: Vec<Violation>,
    pub profit_target_achieved: bool,
    pub progress_pct: f64,
    pub eligible_for_next_level: bool,
}

struct RuleCtx<'a> {
    challenge: &'a UserChallenge,
    plan: &'a ChallengePlan,
    metrics: &'a [DailyMetric],
    now: DateTime<Utc>,
    latest_cumulative: f64,
    target: f64,
    max_loss: f64,
    daily_limit: f64,
}

#[derive(Default)]
struct Outcomes {
    /// First terminal outcome: (passed, reason). Never overwritten.
    terminal: Option<(bool, String)>,
    violations: Vec<Violation>,
}

impl Outcomes {
    fn settle(&mut self, passed: bool, reason: String) {
        if self.terminal.is_none() {
            self.terminal = Some((passed, reason));
        }
    }
}

type Rule = fn(&RuleCtx, &mut Outcomes);

/// Fixed rule order; position matters because the first terminal outcome wins.
const RULES: [Rule; 5] = [
    rule_duration_expiry,
    rule_max_drawdown,
    rule_daily_loss,
    rule_profit_target,
    rule_cumulative_loss,
];

fn rule_duration_expiry(ctx: &RuleCtx, out: &mut Outcomes) {
    let elapsed_days = (ctx.now - ctx.challenge.start_date).num_days();
    if elapsed_days <= ctx.plan.duration_days {
        return;
    }

    out.violations.push(Violation::critical(
        ViolationKind::DurationExpired,
        None,
        format!(
            "Challenge duration of {} days expired after {} days",
            ctx.plan.duration_days, elapsed_days
        ),
    ));

    if ctx.latest_cumulative >= ctx.target {
        out.settle(
            true,
            format!(
                "Profit target of {:.2} reached ({:.2}) within the expired duration",
                ctx.target, ctx.latest_cumulative
            ),
        );
    } else {
        out.settle(
            false,
            format!(
                "Challenge expired after {} days with pnl {:.2} below target {:.2}",
                ctx.plan.duration_days, ctx.latest_cumulative, ctx.target
            ),
        );
    }
}

fn rule_max_drawdown(ctx: &RuleCtx, out: &mut Outcomes) {
    if ctx.challenge.max_drawdown <= ctx.max_loss {
        return;
    }

    let message = format!(
        "Max drawdown {:.2} exceeded the {}% overall loss limit ({:.2})",
        ctx.challenge.max_drawdown, ctx.plan.max_loss_pct, ctx.max_loss
    );
    out.violations
        .push(Violation::critical(ViolationKind::MaxLoss, None, message.clone()));
    out.settle(false, message);
}

fn rule_daily_loss(ctx: &RuleCtx, out: &mut Outcomes) {
    // Scan every metric row; all breach days are recorded even after the
    // terminal outcome is fixed.
    for metric in ctx.metrics {
        if metric.daily_pnl < 0.0 && metric.daily_pnl.abs() > ctx.daily_limit {
            let message = format!(
                "Daily loss {:.2} on {} breached the {}% daily loss limit ({:.2})",
                metric.daily_pnl.abs(),
                metric.date,
                ctx.plan.daily_loss_pct,
                ctx.daily_limit
            );
            out.violations.push(Violation::critical(
                ViolationKind::DailyLoss,
                Some(metric.date),
                message.clone(),
            ));
            out.settle(false, message);
        }
    }
}

fn rule_profit_target(ctx: &RuleCtx, out: &mut Outcomes) {
    if ctx.latest_cumulative >= ctx.target {
        out.settle(
            true,
            format!(
                "Profit target of {:.2} reached with cumulative pnl {:.2}",
                ctx.target, ctx.latest_cumulative
            ),
        );
    }
}

/// Net cumulative loss beyond the overall limit; safety net behind the
/// drawdown rule for challenges whose drawdown field lags.
fn rule_cumulative_loss(ctx: &RuleCtx, out: &mut Outcomes) {
    if ctx.latest_cumulative >= -ctx.max_loss {
        return;
    }

    let message = format!(
        "Cumulative pnl {:.2} breached the {}% overall loss limit ({:.2})",
        ctx.latest_cumulative, ctx.plan.max_loss_pct, ctx.max_loss
    );
    out.violations
        .push(Violation::critical(ViolationKind::MaxLoss, None, message.clone()));
    out.settle(false, message);
}

fn progress_pct(cumulative: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (100.0 * cumulative / target).clamp(0.0, 100.0)
}

/// Evaluate a challenge against its plan limits.
///
/// Non-ACTIVE challenges short-circuit to an echo of their current status
/// with no new violations.
pub fn evaluate(
    challenge: &UserChallenge,
    plan: &ChallengePlan,
    metrics: &[DailyMetric],
    now: DateTime<Utc>,
) -> Evaluation {
    let target = plan.profit_target_amount();
    let latest_cumulative = metrics.last().map(|m| m.cumulative_pnl).unwrap_or(0.0);
    let progress = progress_pct(latest_cumulative, target);

    if challenge.status != ChallengeStatus::Active {
        let passed = challenge.status == ChallengeStatus::Passed;
        return Evaluation {
            status: challenge.status,
            passed,
            failed: challenge.status == ChallengeStatus::Failed,
            reason: None,
            violations: Vec::new(),
            profit_target_achieved: latest_cumulative >= target,
            progress_pct: progress,
            eligible_for_next_level: passed && plan.level < 3,
        };
    }

    let ctx = RuleCtx {
        challenge,
        plan,
        metrics,
        now,
        latest_cumulative,
        target,
        max_loss: plan.max_loss_amount(),
        daily_limit: plan.daily_loss_limit(),
    };

    let mut out = Outcomes::default();
    for rule in RULES {
        rule(&ctx, &mut out);
    }

    let (status, passed, failed, reason) = match out.terminal {
        Some((true, reason)) => (ChallengeStatus::Passed, true, false, Some(reason)),
        Some((false, reason)) => (ChallengeStatus::Failed, false, true, Some(reason)),
        None => (ChallengeStatus::Active, false, false, None),
    };

    Evaluation {
        status,
        passed,
        failed,
        reason,
        violations: out.violations,
        profit_target_achieved: latest_cumulative >= target,
        progress_pct: progress,
        eligible_for_next_level: passed && plan.level < 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

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

    fn challenge(status: ChallengeStatus, start: DateTime<Utc>, max_drawdown: f64) -> UserChallenge {
        UserChallenge {
            id: 1,
            user_id: 1,
            plan_id: 1,
            status,
            start_date: start,
            current_pnl: 0.0,
            max_drawdown,
        }
    }

    fn metric(date: NaiveDate, daily_pnl: f64, cumulative_pnl: f64) -> DailyMetric {
        DailyMetric {
            date,
            daily_pnl,
            cumulative_pnl,
            max_drawdown: 0.0,
        }
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, n).unwrap()
    }

    #[test]
    fn test_profit_target_hit_passes() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(10), 2000.0);
        let metrics = vec![metric(day(1), 4000.0, 4000.0), metric(day(2), 6500.0, 10500.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.passed);
        assert!(!eval.failed);
        assert_eq!(eval.status, ChallengeStatus::Passed);
        assert!(eval.profit_target_achieved);
        assert_eq!(eval.progress_pct, 100.0);
        assert!(eval.eligible_for_next_level);
        assert!(eval.violations.is_empty());
    }

    #[test]
    fn test_daily_loss_breach_fails_with_dated_violation() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 1000.0);
        let metrics = vec![metric(day(1), 1000.0, 1000.0), metric(day(2), -6000.0, -5000.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.failed);
        assert_eq!(eval.status, ChallengeStatus::Failed);
        assert_eq!(eval.violations.len(), 1);
        let v = &eval.violations[0];
        assert_eq!(v.kind, ViolationKind::DailyLoss);
        assert_eq!(v.date, Some(day(2)));
        assert!(eval.reason.as_ref().unwrap().contains("5%"));
    }

    #[test]
    fn test_daily_loss_scan_collects_every_breach_day() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(8), 1000.0);
        let metrics = vec![
            metric(day(1), -5500.0, -5500.0),
            metric(day(2), 2000.0, -3500.0),
            metric(day(3), -7000.0, -10500.0),
        ];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        // Both breach days recorded; the first one fixes the reason
        let daily: Vec<_> = eval
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::DailyLoss)
            .collect();
        assert_eq!(daily.len(), 2);
        assert!(eval.reason.as_ref().unwrap().contains(&day(1).to_string()));
    }

    #[test]
    fn test_max_drawdown_breach_fails() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 12000.0);
        let metrics = vec![metric(day(1), -2000.0, -2000.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.failed);
        assert_eq!(eval.violations[0].kind, ViolationKind::MaxLoss);
    }

    #[test]
    fn test_duration_expiry_passes_when_target_met() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(35), 2000.0);
        let metrics = vec![metric(day(1), 10500.0, 10500.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.passed);
        assert_eq!(eval.status, ChallengeStatus::Passed);
        assert!(eval
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::DurationExpired));
    }

    #[test]
    fn test_duration_expiry_fails_when_target_missed() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(35), 2000.0);
        let metrics = vec![metric(day(1), 3000.0, 3000.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.failed);
        assert!(eval.reason.as_ref().unwrap().contains("expired"));
    }

    #[test]
    fn test_duration_pass_is_not_overturned_by_historical_daily_loss() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(35), 2000.0);
        // A breach day in history, but the expired challenge made target
        let metrics = vec![metric(day(1), -6000.0, -6000.0), metric(day(2), 16500.0, 10500.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.passed);
        assert_eq!(eval.status, ChallengeStatus::Passed);
        // The breach is still recorded as a violation
        assert!(eval
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::DailyLoss));
    }

    #[test]
    fn test_cumulative_loss_safety_net() {
        let now = Utc::now();
        // Drawdown field lags, but net pnl is past the overall limit
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 1000.0);
        let metrics = vec![
            metric(day(1), -4000.0, -4000.0),
            metric(day(2), -4000.0, -8000.0),
            metric(day(3), -3000.0, -11000.0),
        ];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert!(eval.failed);
        assert!(eval
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::MaxLoss));
    }

    #[test]
    fn test_non_active_short_circuits() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Passed, now - Duration::days(10), 0.0);

        let eval = evaluate(&ch, &plan(), &[], now);

        assert!(eval.passed);
        assert!(!eval.failed);
        assert_eq!(eval.status, ChallengeStatus::Passed);
        assert!(eval.violations.is_empty());
        assert!(eval.reason.is_none());
    }

    #[test]
    fn test_active_inside_all_limits_stays_active() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 2000.0);
        let metrics = vec![metric(day(1), 2500.0, 2500.0)];

        let eval = evaluate(&ch, &plan(), &metrics, now);

        assert_eq!(eval.status, ChallengeStatus::Active);
        assert!(!eval.passed && !eval.failed);
        assert_eq!(eval.progress_pct, 25.0);
        assert!(!eval.eligible_for_next_level);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let now = Utc::now();
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 1000.0);
        let metrics = vec![metric(day(1), -6000.0, -6000.0)];
        let p = plan();

        let first = evaluate(&ch, &p, &metrics, now);
        let second = evaluate(&ch, &p, &metrics, now);

        assert_eq!(first.status, second.status);
        assert_eq!(first.violations, second.violations);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn test_level_three_pass_is_not_eligible_for_next_level() {
        let now = Utc::now();
        let mut p = plan();
        p.level = 3;
        let ch = challenge(ChallengeStatus::Active, now - Duration::days(5), 0.0);
        let metrics = vec![metric(day(1), 10500.0, 10500.0)];

        let eval = evaluate(&ch, &p, &metrics, now);

        assert!(eval.passed);
        assert!(!eval.eligible_for_next_level);
    }
}
