//! Data processor pool (C4): validate -> transform -> enrich, with a
//! bounded LRU dedup cache and retry-with-timeout per record.
//!
//! Grounded on the `other_examples` deduplication engine
//! (`DashSet`/`DashMap` content-hash dedup with a time window) adapted
//! to the spec's (message_id, request_id) key and a bounded LRU instead
//! of unbounded global hashes, and on the teacher's `tokio::sync::mpsc`
//! fan-out worker-pool idiom used by the watcher's event processor.

use crate::error::CoreError;
use crate::models::{Priority, ProcessedRecord, UsageRecord};
use crate::pricing::{cost_of, CostMode};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// A validation/transform/enrichment step. Validators and transformers
/// may fail; enrichers are infallible by convention (callers still
/// return `Result` for uniformity, but a failing enricher is logged and
/// ignored rather than dropping the record).
pub trait ProcessorStage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, record: &mut ProcessedRecord) -> Result<(), CoreError>;
}

/// Fixed-capacity LRU of recently-seen dedup keys. A hit marks the
/// record as a duplicate instead of dropping it outright, so the
/// aggregator and metrics calculator can account for it explicitly.
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: std::collections::HashSet<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: std::collections::HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` if `key` was already present (a duplicate),
    /// inserting it as seen either way.
    pub fn check_and_insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        false
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub process_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub fail_on_error: bool,
    pub dedup_enabled: bool,
    pub dedup_capacity: usize,
    pub cost_mode: CostMode,
    pub high_priority_cost_threshold: f64,
    pub low_priority_cost_threshold: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            process_timeout: Duration::from_secs(2),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(50),
            fail_on_error: false,
            dedup_enabled: true,
            dedup_capacity: 10_000,
            cost_mode: CostMode::Auto,
            high_priority_cost_threshold: 1.0,
            low_priority_cost_threshold: 0.10,
        }
    }
}

/// Owns the stage chain and dedup cache; `process` is safe to call
/// concurrently from multiple worker tasks since the dedup cache is
/// behind a mutex and stages are required to be `Send + Sync`.
pub struct ProcessorPool {
    config: ProcessorConfig,
    stages: Vec<Arc<dyn ProcessorStage>>,
    dedup: Mutex<DedupCache>,
}

impl ProcessorPool {
    pub fn new(config: ProcessorConfig) -> Self {
        let capacity = config.dedup_capacity;
        Self {
            config,
            stages: Vec::new(),
            dedup: Mutex::new(DedupCache::new(capacity)),
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn ProcessorStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Run the full chain for one record with retry/timeout, returning
    /// `None` when the pipeline's fail policy drops it.
    pub async fn process(&self, record: UsageRecord) -> Option<ProcessedRecord> {
        let start = Instant::now();
        let mut processed = ProcessedRecord::new(record);

        if self.config.dedup_enabled {
            if let Some(key) = processed.record.dedup_key() {
                let mut dedup = self.dedup.lock().await;
                if dedup.check_and_insert(&key) {
                    processed.metadata.insert("duplicate".to_string(), "true".to_string());
                    processed.processing_time = start.elapsed();
                    return Some(processed);
                }
            }
        }

        let outcome = tokio::time::timeout(self.config.process_timeout, self.run_chain_with_retry(&mut processed)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "processor stage failed");
                if self.config.fail_on_error {
                    return None;
                }
            }
            Err(_) => {
                debug!("processor timed out");
                if self.config.fail_on_error {
                    return None;
                }
            }
        }

        let cost = cost_of(&processed.record, self.config.cost_mode);
        processed.priority = Priority::from_cost(
            cost,
            self.config.high_priority_cost_threshold,
            self.config.low_priority_cost_threshold,
        );
        processed.processing_time = start.elapsed();
        Some(processed)
    }

    async fn run_chain_with_retry(&self, record: &mut ProcessedRecord) -> Result<(), CoreError> {
        let mut attempt = 0;
        loop {
            match self.run_chain_once(record) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.config.retry_attempts {
                        return Err(e);
                    }
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    fn run_chain_once(&self, record: &mut ProcessedRecord) -> Result<(), CoreError> {
        for stage in &self.stages {
            stage.apply(record)?;
        }
        Ok(())
    }
}

/// A validator stage rejecting records with zero total tokens.
pub struct NonZeroTokensValidator;

impl ProcessorStage for NonZeroTokensValidator {
    fn name(&self) -> &str {
        "non_zero_tokens"
    }

    fn apply(&self, record: &mut ProcessedRecord) -> Result<(), CoreError> {
        if record.record.total_tokens() == 0 {
            return Err(CoreError::InvalidRecord {
                path: std::path::PathBuf::new(),
                line_number: 0,
                message: "zero total tokens".to_string(),
            });
        }
        Ok(())
    }
}

/// An enricher stage tagging the record with an `unknown_model` flag
/// when the pricing catalog has no match, mirroring C1's contract.
pub struct UnknownModelEnricher;

impl ProcessorStage for UnknownModelEnricher {
    fn name(&self) -> &str {
        "unknown_model"
    }

    fn apply(&self, record: &mut ProcessedRecord) -> Result<(), CoreError> {
        if crate::pricing::get_model_pricing(&record.record.model).is_none() {
            record.metadata.insert("unknown_model".to_string(), "true".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(message_id: Option<&str>, request_id: Option<&str>) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now(),
            model: "claude-3-5-sonnet".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            cost_usd: None,
            message_id: message_id.map(String::from),
            request_id: request_id.map(String::from),
        }
    }

    #[test]
    fn test_dedup_cache_detects_repeat() {
        let mut cache = DedupCache::new(10);
        assert!(!cache.check_and_insert("a"));
        assert!(cache.check_and_insert("a"));
    }

    #[test]
    fn test_dedup_cache_evicts_oldest_beyond_capacity() {
        let mut cache = DedupCache::new(2);
        cache.check_and_insert("a");
        cache.check_and_insert("b");
        cache.check_and_insert("c");
        assert!(!cache.check_and_insert("a"));
    }

    #[tokio::test]
    async fn test_process_marks_duplicate_second_time() {
        let pool = ProcessorPool::new(ProcessorConfig::default());
        let r1 = record(Some("m1"), Some("r1"));
        let r2 = r1.clone();

        let first = pool.process(r1).await.unwrap();
        assert!(!first.is_duplicate());

        let second = pool.process(r2).await.unwrap();
        assert!(second.is_duplicate());
    }

    #[tokio::test]
    async fn test_records_without_ids_are_never_deduped() {
        let pool = ProcessorPool::new(ProcessorConfig::default());
        let r1 = record(None, None);
        let r2 = r1.clone();

        let first = pool.process(r1).await.unwrap();
        let second = pool.process(r2).await.unwrap();
        assert!(!first.is_duplicate());
        assert!(!second.is_duplicate());
    }

    #[tokio::test]
    async fn test_validator_failure_drops_when_fail_on_error() {
        let config = ProcessorConfig {
            fail_on_error: true,
            dedup_enabled: false,
            ..Default::default()
        };
        let pool = ProcessorPool::new(config).with_stage(Arc::new(NonZeroTokensValidator));
        let mut zero = record(None, None);
        zero.prompt_tokens = 0;
        zero.completion_tokens = 0;
        assert!(pool.process(zero).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_model_enricher_tags_non_claude_model() {
        let pool = ProcessorPool::new(ProcessorConfig {
            dedup_enabled: false,
            ..Default::default()
        })
        .with_stage(Arc::new(UnknownModelEnricher));
        let mut r = record(None, None);
        r.model = "gpt-4o".to_string();
        let processed = pool.process(r).await.unwrap();
        assert_eq!(processed.metadata.get("unknown_model").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_unknown_model_enricher_tags_unrecognized_claude_prefix() {
        let pool = ProcessorPool::new(ProcessorConfig {
            dedup_enabled: false,
            ..Default::default()
        })
        .with_stage(Arc::new(UnknownModelEnricher));
        let mut r = record(None, None);
        r.model = "claude-future-model-9".to_string();
        let processed = pool.process(r).await.unwrap();
        assert_eq!(processed.metadata.get("unknown_model").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_unknown_model_enricher_leaves_known_model_untagged() {
        let pool = ProcessorPool::new(ProcessorConfig {
            dedup_enabled: false,
            ..Default::default()
        })
        .with_stage(Arc::new(UnknownModelEnricher));
        let processed = pool.process(record(None, None)).await.unwrap();
        assert!(!processed.metadata.contains_key("unknown_model"));
    }

    #[tokio::test]
    async fn test_priority_assigned_from_computed_cost() {
        let pool = ProcessorPool::new(ProcessorConfig {
            cost_mode: CostMode::ForceCompute,
            ..Default::default()
        });
        let mut expensive = record(None, None);
        expensive.prompt_tokens = 10_000_000;
        let processed = pool.process(expensive).await.unwrap();
        assert_eq!(processed.priority, Priority::High);
    }
}
