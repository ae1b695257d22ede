//! Core ingestion-and-analytics pipeline: watches JSONL usage logs,
//! parses and deduplicates records, detects 5-hour session windows,
//! and derives real-time cost/usage metrics and plan-limit warnings.
//!
//! External collaborators (a TUI/console renderer, alert delivery
//! channels, the outer CLI) subscribe to [`pipeline::Pipeline`]
//! snapshots; this crate owns none of that presentation layer.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod limits;
pub mod metrics;
pub mod models;
pub mod percentile;
pub mod pipeline;
pub mod pricing;
pub mod processor;
pub mod reader;
pub mod session_detector;
pub mod watcher;

pub use config::Config;
pub use error::{CoreError, DegradedState, LoadReport};
pub use limits::{LimitSeverity, LimitWarning};
pub use pipeline::{Pipeline, Snapshot};
pub use models::{Plan, PlanType, RealtimeMetrics, SessionBlock, UsageRecord};
