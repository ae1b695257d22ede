//! Priority batch aggregator (C5): coalesces processed records into
//! size- or time-bounded batches, flushed in priority order.

use crate::error::CoreError;
use crate::models::{Priority, ProcessedRecord};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Batch {
    pub priority: Priority,
    pub records: Vec<ProcessedRecord>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl Batch {
    fn new(priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            priority,
            records: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub max_size_high: usize,
    pub max_size_normal: usize,
    pub max_size_low: usize,
    pub force_flush_size: usize,
    pub max_wait_time: Duration,
    pub flush_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_size_high: 20,
            max_size_normal: 50,
            max_size_low: 100,
            force_flush_size: 500,
            max_wait_time: Duration::from_secs(5),
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl AggregatorConfig {
    fn max_size_for(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical | Priority::High => self.max_size_high,
            Priority::Normal => self.max_size_normal,
            Priority::Low => self.max_size_low,
        }
    }
}

/// One completed batch, ready to hand to the event dispatcher.
#[derive(Debug, Clone)]
pub struct BatchEvent {
    pub batch: Batch,
}

/// Maintains one in-progress [`Batch`] per priority and flushes them
/// according to size, age, or an explicit force-flush.
pub struct BatchAggregator {
    config: AggregatorConfig,
    buckets: HashMap<Priority, Batch>,
    out: mpsc::Sender<BatchEvent>,
}

impl BatchAggregator {
    pub fn new(config: AggregatorConfig, out: mpsc::Sender<BatchEvent>) -> Self {
        let mut buckets = HashMap::new();
        for priority in [Priority::Critical, Priority::High, Priority::Normal, Priority::Low] {
            buckets.insert(priority, Batch::new(priority));
        }
        Self { config, buckets, out }
    }

    /// Add a record to its bucket; flushes that bucket (or everything,
    /// on the global threshold) as a side effect when thresholds are hit.
    /// A flush failure leaves the batch in place and is surfaced to the
    /// caller rather than silently dropping the records just added.
    pub async fn add(&mut self, record: ProcessedRecord) -> Result<(), CoreError> {
        let priority = record.priority;
        if let Some(batch) = self.buckets.get_mut(&priority) {
            batch.records.push(record);
            batch.updated_at = Instant::now();
        }

        let total: usize = self.buckets.values().map(|b| b.records.len()).sum();
        if total >= self.config.force_flush_size {
            return self.flush_all().await;
        }

        let bucket_len = self.buckets.get(&priority).map(|b| b.records.len()).unwrap_or(0);
        if bucket_len >= self.config.max_size_for(priority) {
            return self.flush_priority(priority).await;
        }
        Ok(())
    }

    /// Called on a fixed tick; flushes any bucket whose oldest record
    /// has aged past `max_wait_time`. Returns the first failure, if any,
    /// after attempting every stale bucket.
    pub async fn tick(&mut self) -> Result<(), CoreError> {
        let stale: Vec<Priority> = self
            .buckets
            .iter()
            .filter(|(_, b)| !b.records.is_empty() && b.age() >= self.config.max_wait_time)
            .map(|(p, _)| *p)
            .collect();
        let mut first_err = None;
        for priority in stale {
            if let Err(e) = self.flush_priority(priority).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn flush_all(&mut self) -> Result<(), CoreError> {
        let mut first_err = None;
        for priority in [Priority::Critical, Priority::High, Priority::Normal, Priority::Low] {
            if let Err(e) = self.flush_priority(priority).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush one priority bucket. The batch is only taken out of the
    /// bucket once `try_send` has actually accepted it; on a full or
    /// closed channel the records stay in the bucket for the next
    /// attempt instead of being lost.
    async fn flush_priority(&mut self, priority: Priority) -> Result<(), CoreError> {
        let Some(batch) = self.buckets.get_mut(&priority) else { return Ok(()) };
        if batch.records.is_empty() {
            return Ok(());
        }
        let count = batch.records.len();
        let to_send = BatchEvent { batch: batch.clone() };
        match self.out.try_send(to_send) {
            Ok(()) => {
                *batch = Batch::new(priority);
                debug!(?priority, count, "flushed batch");
                Ok(())
            }
            Err(_) => {
                warn!(?priority, count, "batch output channel unavailable, keeping batch");
                Err(CoreError::BatchChannelUnavailable { priority, count })
            }
        }
    }

    pub fn pending_count(&self, priority: Priority) -> usize {
        self.buckets.get(&priority).map(|b| b.records.len()).unwrap_or(0)
    }
}
