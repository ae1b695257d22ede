//! Limit engine (C9): walks the plan's warning ladder against the
//! latest metrics snapshot, gates re-alerting with a per-severity
//! cooldown, and can derive an adaptive limit from historical P90 cost.
//!
//! Grounded on the teacher's `usage_estimator.rs` (`SubscriptionPlan`
//! monthly budget table) and `quota.rs` (`AlertLevel` determination from
//! a percentage-used figure), generalized from a single monthly alert to
//! a multi-level ladder with cooldowns per the spec's richer model.

use crate::models::{Plan, ResetCycle};
use crate::percentile::{compute_distribution, validate_data_quality};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Severity of a limit warning, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LimitSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl LimitSeverity {
    /// Minimum time between repeat alerts at this severity, mirroring
    /// the teacher's escalating-but-not-spammy notification cadence.
    pub fn cooldown(&self) -> Duration {
        match self {
            LimitSeverity::Info => Duration::from_secs(2 * 3600),
            LimitSeverity::Warning => Duration::from_secs(3600),
            LimitSeverity::Error => Duration::from_secs(30 * 60),
            LimitSeverity::Critical => Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitWarning {
    pub severity: LimitSeverity,
    pub percentage: f64,
    pub recommendation: String,
}

fn severity_for_fraction(fraction: f64) -> Option<LimitSeverity> {
    if fraction >= 1.0 {
        Some(LimitSeverity::Critical)
    } else if fraction >= 0.95 {
        Some(LimitSeverity::Error)
    } else if fraction >= 0.80 {
        Some(LimitSeverity::Warning)
    } else if fraction >= 0.50 {
        Some(LimitSeverity::Info)
    } else {
        None
    }
}

fn recommendation_for(severity: LimitSeverity, percentage: f64) -> String {
    match severity {
        LimitSeverity::Critical => format!(
            "plan limit exceeded ({percentage:.0}% used); usage will be throttled or billed overage until reset"
        ),
        LimitSeverity::Error => format!(
            "{percentage:.0}% of plan limit used; consider pausing non-essential work until the next reset"
        ),
        LimitSeverity::Warning => format!("{percentage:.0}% of plan limit used; monitor remaining budget"),
        LimitSeverity::Info => format!("{percentage:.0}% of plan limit used"),
    }
}

/// Tracks the last time each severity fired, so the same warning level
/// doesn't re-trigger every metrics tick.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_fired: HashMap<&'static str, std::time::Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(severity: LimitSeverity) -> &'static str {
        match severity {
            LimitSeverity::Info => "info",
            LimitSeverity::Warning => "warning",
            LimitSeverity::Error => "error",
            LimitSeverity::Critical => "critical",
        }
    }

    fn ready(&self, severity: LimitSeverity) -> bool {
        match self.last_fired.get(Self::key(severity)) {
            Some(last) => last.elapsed() >= severity.cooldown(),
            None => true,
        }
    }

    fn record_fired(&mut self, severity: LimitSeverity) {
        self.last_fired.insert(Self::key(severity), std::time::Instant::now());
    }
}

/// Evaluate the plan's limit against `current_cost`. Returns `None`
/// when the plan has no limit, the usage is below the lowest rung, or
/// the applicable severity is still within its cooldown window.
pub fn evaluate(plan: &Plan, current_cost: f64, cooldowns: &mut CooldownTracker) -> Option<LimitWarning> {
    let percentage = plan.percentage_used(current_cost)?;
    let fraction = percentage / 100.0;
    let severity = severity_for_fraction(fraction)?;

    if !cooldowns.ready(severity) {
        return None;
    }
    cooldowns.record_fired(severity);

    Some(LimitWarning {
        severity,
        percentage,
        recommendation: recommendation_for(severity, percentage),
    })
}

/// Derives an adaptive cost limit from historical per-session totals:
/// P90 with a 10% headroom multiplier, the same shape as the teacher's
/// `usage_estimator` budget projection but driven by observed data
/// instead of a fixed plan table. Returns `None` if the sample quality
/// doesn't clear [`crate::percentile::validate_data_quality`].
pub fn adaptive_limit(historical_session_costs: &[f64]) -> Option<f64> {
    if !validate_data_quality(historical_session_costs).is_empty() {
        return None;
    }
    let dist = compute_distribution(historical_session_costs);
    Some(dist.p90 * 1.10)
}

/// Computes the moment the plan's usage window next resets.
pub fn time_to_reset(plan: &Plan, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match plan.reset_cycle {
        ResetCycle::Daily => {
            let tomorrow = now.date_naive().succ_opt()?;
            tomorrow.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
        }
        ResetCycle::Weekly => {
            let days_until_monday = (8 - now.weekday().num_days_from_monday()) % 7;
            let days_until_monday = if days_until_monday == 0 { 7 } else { days_until_monday };
            let next_monday = now.date_naive() + ChronoDuration::days(days_until_monday as i64);
            next_monday.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
        }
        ResetCycle::Monthly => {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            chrono::NaiveDate::from_ymd_opt(year, month, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
    }
}
