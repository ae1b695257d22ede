//! Session windows: the 5-hour blocks the session detector (C7) carves
//! out of a timestamp-sorted record stream.

use super::record::UsageRecord;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SESSION_DURATION_HOURS: i64 = 5;
pub const GAP_THRESHOLD_HOURS: i64 = 5;

/// Token totals accumulated by a session block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn add_record(&mut self, record: &UsageRecord) {
        self.prompt_tokens += record.prompt_tokens;
        self.completion_tokens += record.completion_tokens;
        self.cache_creation_tokens += record.cache_creation_tokens;
        self.cache_read_tokens += record.cache_read_tokens;
    }
}

/// Per-model token/cost breakdown within one session block.
#[derive(Debug, Clone, Default)]
pub struct ModelStats {
    pub token_counts: TokenCounts,
    pub cost_usd: f64,
    pub message_count: u64,
}

/// Where a boundary's timing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundarySource {
    Detected,
    Explicit,
    Inferred,
    Merged,
}

/// Rounds a timestamp down to the start of its hour, matching the
/// detector's `RoundToHour(first_record_timestamp)` anchor rule.
pub fn round_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// A 5-hour session window, either populated with records or a gap
/// between two populated windows.
#[derive(Debug, Clone)]
pub struct SessionBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub is_gap: bool,
    pub token_counts: TokenCounts,
    pub cost_usd: f64,
    pub sent_messages_count: u64,
    pub models_seen: Vec<String>,
    pub per_model_stats: HashMap<String, ModelStats>,
    pub confidence: f64,
    pub source: BoundarySource,
}

impl SessionBlock {
    pub fn new_at(start_time: DateTime<Utc>) -> Self {
        Self {
            id: start_time.to_rfc3339(),
            start_time,
            end_time: start_time + ChronoDuration::hours(SESSION_DURATION_HOURS),
            is_active: false,
            is_gap: false,
            token_counts: TokenCounts::default(),
            cost_usd: 0.0,
            sent_messages_count: 0,
            models_seen: Vec::new(),
            per_model_stats: HashMap::new(),
            confidence: 0.0,
            source: BoundarySource::Detected,
        }
    }

    pub fn gap(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: format!("gap:{}", start_time.to_rfc3339()),
            start_time,
            end_time,
            is_active: false,
            is_gap: true,
            token_counts: TokenCounts::default(),
            cost_usd: 0.0,
            sent_messages_count: 0,
            models_seen: Vec::new(),
            per_model_stats: HashMap::new(),
            confidence: 1.0,
            source: BoundarySource::Inferred,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_time && ts < self.end_time
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 60.0
    }

    pub fn add_record(&mut self, record: &UsageRecord, cost_usd: f64) {
        self.token_counts.add_record(record);
        self.cost_usd += cost_usd;
        self.sent_messages_count += 1;
        if !self.models_seen.iter().any(|m| m == &record.model) {
            self.models_seen.push(record.model.clone());
        }
        let stats = self.per_model_stats.entry(record.model.clone()).or_default();
        stats.token_counts.add_record(record);
        stats.cost_usd += cost_usd;
        stats.message_count += 1;
    }

    /// Confidence heuristic per the detector's design: base 0.70,
    /// adjusted by closeness to the nominal duration and record count.
    pub fn compute_confidence(duration: ChronoDuration, record_count: usize) -> f64 {
        let nominal = ChronoDuration::hours(SESSION_DURATION_HOURS).num_seconds() as f64;
        let actual = duration.num_seconds() as f64;
        let ratio = if nominal > 0.0 { actual / nominal } else { 0.0 };

        let mut score: f64 = 0.70;
        if (ratio - 1.0).abs() <= 0.10 {
            score += 0.20;
        } else if !(0.50..=1.50).contains(&ratio) {
            score -= 0.20;
        }

        if record_count >= 5 {
            score += 0.10;
        } else if record_count <= 1 {
            score -= 0.10;
        }

        score.clamp(0.0, 1.0)
    }
}

/// A resolved window boundary, independent of the records inside it.
#[derive(Debug, Clone, Copy)]
pub struct SessionBoundary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub confidence: f64,
    pub source: BoundarySource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_round_to_hour() {
        assert_eq!(round_to_hour(ts(14, 37)), ts(14, 0));
    }

    #[test]
    fn test_block_contains_respects_half_open_interval() {
        let block = SessionBlock::new_at(ts(0, 0));
        assert!(block.contains(ts(0, 0)));
        assert!(block.contains(ts(4, 59)));
        assert!(!block.contains(ts(5, 0)));
    }

    #[test]
    fn test_confidence_peaks_near_nominal_duration_with_enough_records() {
        let full = ChronoDuration::hours(5);
        assert!(SessionBlock::compute_confidence(full, 10) > SessionBlock::compute_confidence(full, 1));
    }

    #[test]
    fn test_confidence_penalizes_extreme_durations() {
        let short = ChronoDuration::minutes(10);
        let nominal = ChronoDuration::hours(5);
        assert!(SessionBlock::compute_confidence(short, 5) < SessionBlock::compute_confidence(nominal, 5));
    }

    #[test]
    fn test_token_counts_total() {
        let counts = TokenCounts {
            prompt_tokens: 10,
            completion_tokens: 5,
            cache_creation_tokens: 2,
            cache_read_tokens: 1,
        };
        assert_eq!(counts.total(), 18);
    }
}
