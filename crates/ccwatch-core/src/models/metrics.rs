//! The live snapshot the metrics calculator (C8) publishes after each
//! recomputation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Token/cost share of one model within the active session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelShare {
    pub token_count: u64,
    pub cost_usd: f64,
    pub percentage: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// The value the renderer (an external collaborator) subscribes to.
#[derive(Debug, Clone)]
pub struct RealtimeMetrics {
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub current_tokens: u64,
    pub current_cost: f64,
    pub session_progress: f64,
    pub time_remaining: Duration,
    pub tokens_per_minute: f64,
    pub tokens_per_hour: f64,
    pub cost_per_minute: f64,
    pub cost_per_hour: f64,
    pub burn_rate: f64,
    pub projected_tokens: u64,
    pub projected_cost: f64,
    pub predicted_end_time: Option<DateTime<Utc>>,
    pub confidence_level: f64,
    pub model_distribution: HashMap<String, ModelShare>,
    pub health_status: HealthStatus,
    pub last_updated: DateTime<Utc>,
}

impl RealtimeMetrics {
    /// An all-zero snapshot for a session with no active block yet.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            session_start: now,
            session_end: now,
            current_tokens: 0,
            current_cost: 0.0,
            session_progress: 0.0,
            time_remaining: Duration::ZERO,
            tokens_per_minute: 0.0,
            tokens_per_hour: 0.0,
            cost_per_minute: 0.0,
            cost_per_hour: 0.0,
            burn_rate: 0.0,
            projected_tokens: 0,
            projected_cost: 0.0,
            predicted_end_time: None,
            confidence_level: 0.0,
            model_distribution: HashMap::new(),
            health_status: HealthStatus::Healthy,
            last_updated: now,
        }
    }
}
