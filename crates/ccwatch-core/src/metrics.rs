//! Real-time metrics calculator (C8): derives a [`RealtimeMetrics`]
//! snapshot from the active session block plus recent history.
//!
//! Grounded on the teacher's `quota.rs` (`QuotaStatus`, `AlertLevel`,
//! prorated projection) and `analytics/forecasting.rs` (the
//! slope/confidence idea), adapted from monthly-budget projection to
//! within-session rate/burn projection.

use crate::models::{HealthStatus, ModelShare, Plan, ProcessedRecord, RealtimeMetrics, SessionBlock};
use crate::pricing::{cost_of, CostMode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub cost_mode: CostMode,
    pub warn_fraction: f64,
    pub alert_fraction: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cost_mode: CostMode::Auto,
            warn_fraction: 0.80,
            alert_fraction: 0.95,
        }
    }
}

/// Compute a fresh snapshot from the active block's records (already
/// time-sorted) and the plan currently in effect.
pub fn compute_metrics(
    active_block: &SessionBlock,
    active_records: &[ProcessedRecord],
    plan: &Plan,
    config: &MetricsConfig,
    now: DateTime<Utc>,
) -> RealtimeMetrics {
    let session_duration = active_block.end_time - active_block.start_time;
    let elapsed = now - active_block.start_time;
    let session_progress = if session_duration.num_seconds() > 0 {
        (elapsed.num_seconds() as f64 / session_duration.num_seconds() as f64 * 100.0).min(100.0)
    } else {
        100.0
    };
    let time_remaining = (active_block.end_time - now).max(ChronoDuration::zero()).to_std().unwrap_or_default();

    let one_minute_ago = now - ChronoDuration::minutes(1);
    let one_hour_ago = now - ChronoDuration::hours(1);

    let mut tokens_last_minute = 0u64;
    let mut tokens_last_hour = 0u64;
    let mut cost_last_minute = 0.0;
    let mut cost_last_hour = 0.0;
    let mut model_distribution: HashMap<String, ModelShare> = HashMap::new();

    for record in active_records {
        if record.is_duplicate() {
            continue;
        }
        let ts = record.record.timestamp;
        let tokens = record.record.total_tokens();
        let cost = cost_of(&record.record, config.cost_mode);

        if ts >= one_hour_ago {
            tokens_last_hour += tokens;
            cost_last_hour += cost;
        }
        if ts >= one_minute_ago {
            tokens_last_minute += tokens;
            cost_last_minute += cost;
        }

        let share = model_distribution.entry(record.record.model.clone()).or_default();
        share.token_count += tokens;
        share.cost_usd += cost;
        share.last_used = Some(share.last_used.map_or(ts, |prev| prev.max(ts)));
    }

    let current_tokens = active_block.token_counts.total();
    let total_cost_basis = current_tokens.max(1) as f64;
    for share in model_distribution.values_mut() {
        share.percentage = share.token_count as f64 / total_cost_basis * 100.0;
    }

    let tokens_per_minute = tokens_last_minute as f64;
    let tokens_per_hour = tokens_last_hour as f64;
    let cost_per_minute = cost_last_minute;
    let cost_per_hour = cost_last_hour;
    let burn_rate = tokens_per_hour / 60.0;

    let remaining_minutes = time_remaining.as_secs_f64() / 60.0;
    let (projected_tokens, projected_cost, confidence_level) = if tokens_per_minute > 0.0 {
        let projected_tokens = current_tokens + (tokens_per_minute * remaining_minutes) as u64;
        let projected_cost = active_block.cost_usd + cost_per_minute * remaining_minutes;
        let confidence = (active_records.len() as f64 / 10.0 * 100.0).min(100.0);
        (projected_tokens, projected_cost, confidence)
    } else {
        (current_tokens, active_block.cost_usd, 0.0)
    };

    let predicted_end_time = plan.cost_limit.and_then(|limit| {
        if cost_per_minute > 0.0 && limit > active_block.cost_usd {
            let minutes_to_exhaustion = (limit - active_block.cost_usd) / cost_per_minute;
            Some(now + ChronoDuration::minutes(minutes_to_exhaustion as i64))
        } else {
            None
        }
    });

    let health_status = match plan.percentage_used(active_block.cost_usd) {
        Some(pct) if pct >= config.alert_fraction * 100.0 => HealthStatus::Critical,
        Some(pct) if pct >= config.warn_fraction * 100.0 => HealthStatus::Warning,
        _ => HealthStatus::Healthy,
    };

    RealtimeMetrics {
        session_start: active_block.start_time,
        session_end: active_block.end_time,
        current_tokens,
        current_cost: active_block.cost_usd,
        session_progress,
        time_remaining,
        tokens_per_minute,
        tokens_per_hour,
        cost_per_minute,
        cost_per_hour,
        burn_rate,
        projected_tokens,
        projected_cost,
        predicted_end_time,
        confidence_level,
        model_distribution,
        health_status,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanType, UsageRecord};
    use chrono::TimeZone;

    fn block(start: DateTime<Utc>) -> SessionBlock {
        let mut b = SessionBlock::new_at(start);
        b.is_active = true;
        b
    }

    fn record_at(ts: DateTime<Utc>, tokens: u64) -> ProcessedRecord {
        let mut p = ProcessedRecord::new(UsageRecord {
            timestamp: ts,
            model: "claude-3-5-sonnet".to_string(),
            prompt_tokens: tokens,
            completion_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            cost_usd: None,
            message_id: None,
            request_id: None,
        });
        p.priority = crate::models::Priority::Normal;
        p
    }

    #[test]
    fn test_empty_block_yields_zero_rates_and_confidence() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = start + ChronoDuration::minutes(30);
        let mut b = block(start);
        b.end_time = start + ChronoDuration::hours(5);
        let plan = Plan::new(PlanType::Pro, None);
        let metrics = compute_metrics(&b, &[], &plan, &MetricsConfig::default(), now);

        assert_eq!(metrics.tokens_per_minute, 0.0);
        assert_eq!(metrics.confidence_level, 0.0);
        assert_eq!(metrics.projected_tokens, metrics.current_tokens);
    }

    #[test]
    fn test_progress_and_time_remaining_bounds() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut b = block(start);
        b.end_time = start + ChronoDuration::hours(5);
        let now = start + ChronoDuration::hours(10);
        let plan = Plan::new(PlanType::Pro, None);
        let metrics = compute_metrics(&b, &[], &plan, &MetricsConfig::default(), now);

        assert_eq!(metrics.session_progress, 100.0);
        assert_eq!(metrics.time_remaining, std::time::Duration::ZERO);
    }

    #[test]
    fn test_projection_monotone_with_positive_burn() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut b = block(start);
        b.end_time = start + ChronoDuration::hours(5);
        let now = start + ChronoDuration::seconds(30);
        let mut records = vec![];
        for i in 0..5 {
            let r = record_at(now - ChronoDuration::seconds(i), 1000);
            b.add_record(&r.record, 0.0);
            records.push(r);
        }
        let plan = Plan::new(PlanType::Pro, None);
        let metrics = compute_metrics(&b, &records, &plan, &MetricsConfig::default(), now);

        assert!(metrics.current_tokens <= metrics.projected_tokens);
    }

    #[test]
    fn test_health_status_escalates_with_usage() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut b = block(start);
        b.end_time = start + ChronoDuration::hours(5);
        b.cost_usd = 17.5;
        let now = start + ChronoDuration::minutes(10);
        let plan = Plan::new(PlanType::Pro, None);
        let metrics = compute_metrics(&b, &[], &plan, &MetricsConfig::default(), now);

        assert_eq!(metrics.health_status, HealthStatus::Critical);
    }
}
