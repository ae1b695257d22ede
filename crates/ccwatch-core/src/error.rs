//! Error types for the ingestion-and-analytics pipeline.
//!
//! Provides a closed error hierarchy with thiserror plus a severity
//! classification used for graceful degradation during startup scans.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error type for pipeline operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // System / IO
    // ===================
    #[error("failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("line {line_number} in {path} exceeds max length ({limit} bytes)")]
    LineTooLong {
        path: PathBuf,
        line_number: u64,
        limit: usize,
    },

    // ===================
    // DataFormat / DataCorrupt / DataMissing
    // ===================
    #[error("failed to parse JSON line {line_number} in {path}: {message}")]
    JsonlParse {
        path: PathBuf,
        line_number: u64,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("invalid record in {path} line {line_number}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line_number: u64,
        message: String,
    },

    #[error("failed to parse config: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    // ===================
    // Watch
    // ===================
    #[error("file watcher error: {message}")]
    WatchError {
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    // ===================
    // Processing / Session
    // ===================
    #[error("processing of record timed out after {timeout_secs}s")]
    ProcessTimeout { timeout_secs: u64 },

    #[error("session boundary could not be resolved: {message}")]
    SessionBoundary { message: String },

    // ===================
    // Config / Logic
    // ===================
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("custom plan requires subscription.custom_cost_limit > 0")]
    MissingCustomLimit,

    // ===================
    // Timeout / Circuit breaker
    // ===================
    #[error("operation timed out after {timeout_secs}s: {operation}")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("batch output channel unavailable for {priority:?} priority, batch of {count} records kept")]
    BatchChannelUnavailable { priority: crate::models::Priority, count: usize },

    #[error("circuit breaker open for {operation}: {failures} consecutive failures")]
    CircuitBreakerOpen { operation: String, failures: u32 },
}

impl CoreError {
    /// Classify this error's severity for reporting and metrics purposes.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::LineTooLong { .. }
            | CoreError::JsonlParse { .. }
            | CoreError::InvalidRecord { .. } => ErrorSeverity::Low,
            CoreError::FileNotFound { .. }
            | CoreError::WatchError { .. }
            | CoreError::ProcessTimeout { .. }
            | CoreError::SessionBoundary { .. }
            | CoreError::Timeout { .. } => ErrorSeverity::Medium,
            CoreError::FileRead { .. }
            | CoreError::DirectoryNotFound { .. }
            | CoreError::PermissionDenied { .. }
            | CoreError::ConfigParse { .. }
            | CoreError::InvalidConfig { .. }
            | CoreError::MissingCustomLimit => ErrorSeverity::High,
            CoreError::CircuitBreakerOpen { .. } => ErrorSeverity::Critical,
            CoreError::BatchChannelUnavailable { .. } => ErrorSeverity::Medium,
        }
    }
}

/// Severity level for errors encountered during load or processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Individual error entry in a [`LoadReport`].
#[derive(Debug, Clone)]
pub struct LoadError {
    pub source: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub suggestion: Option<String>,
}

impl LoadError {
    pub fn low(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source, message, ErrorSeverity::Low)
    }

    pub fn medium(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source, message, ErrorSeverity::Medium)
    }

    pub fn high(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source, message, ErrorSeverity::High)
    }

    pub fn critical(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source, message, ErrorSeverity::Critical)
    }

    fn new(source: impl Into<String>, message: impl Into<String>, severity: ErrorSeverity) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Build a user-facing entry from a [`CoreError`], attaching an
    /// actionable suggestion where one is known.
    pub fn from_core_error(source: impl Into<String>, error: &CoreError) -> Self {
        let source = source.into();
        let severity = error.severity();
        let (message, suggestion) = match error {
            CoreError::FileNotFound { path } => (
                format!("file not found: {}", path.display()),
                Some(format!("check the path exists: ls {}", path.display())),
            ),
            CoreError::PermissionDenied { path } => (
                format!("permission denied: {}", path.display()),
                Some(format!("check permissions: chmod +r {}", path.display())),
            ),
            CoreError::JsonlParse {
                path,
                line_number,
                message,
                ..
            } => (
                format!(
                    "malformed line {} in {}: {}",
                    line_number,
                    path.display(),
                    message
                ),
                Some(format!("inspect line: sed -n '{}p' {}", line_number, path.display())),
            ),
            _ => (error.to_string(), None),
        };

        Self {
            source,
            message,
            severity,
            suggestion,
        }
    }
}

/// Report of errors encountered during a startup backfill scan.
///
/// Enables graceful degradation by tracking partial failures instead
/// of aborting the whole scan on the first error.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub errors: Vec<LoadError>,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub records_loaded: u64,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    pub fn add_low(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::low(source, message));
    }

    pub fn add_critical(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::critical(source, message));
    }

    pub fn has_critical_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == ErrorSeverity::Critical)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn severity_counts(&self) -> (usize, usize, usize, usize) {
        let count = |s| self.errors.iter().filter(|e| e.severity == s).count();
        (
            count(ErrorSeverity::Low),
            count(ErrorSeverity::Medium),
            count(ErrorSeverity::High),
            count(ErrorSeverity::Critical),
        )
    }

    pub fn merge(&mut self, other: LoadReport) {
        self.errors.extend(other.errors);
        self.files_scanned += other.files_scanned;
        self.files_failed += other.files_failed;
        self.records_loaded += other.records_loaded;
    }
}

/// Degraded state indicator surfaced to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedState {
    Healthy,
    PartialData { missing: Vec<String>, reason: String },
    ReadOnly { reason: String },
}

impl DegradedState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}

/// State machine for the retry circuit breaker used by C4/C6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// A simple Closed -> Open -> HalfOpen -> Closed circuit breaker.
///
/// Grounded on the teacher's `CoreError::CircuitBreakerOpen` variant,
/// generalized into a standalone state machine shared by the processor
/// pool and the event dispatcher.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<std::time::Instant>,
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            failure_threshold,
            recovery_timeout,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Call before attempting the guarded operation. Returns an error if
    /// the breaker is open and the recovery timeout has not yet elapsed.
    pub fn before_call(&mut self) -> Result<(), CoreError> {
        if self.state == BreakerState::Open {
            let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.recovery_timeout {
                self.state = BreakerState::HalfOpen;
            } else {
                return Err(CoreError::CircuitBreakerOpen {
                    operation: self.operation.clone(),
                    failures: self.consecutive_failures,
                });
            }
        }
        Ok(())
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::HalfOpen || self.consecutive_failures >= self.failure_threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(std::time::Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_report_severity_counting() {
        let mut report = LoadReport::new();
        report.add_low("reader", "line too long");
        report.add_error(LoadError::medium("watcher", "debounce overflow"));
        report.add_critical("config", "missing custom limit");

        let (low, medium, high, critical) = report.severity_counts();
        assert_eq!(low, 1);
        assert_eq!(medium, 1);
        assert_eq!(high, 0);
        assert_eq!(critical, 1);
        assert!(report.has_critical_errors());
    }

    #[test]
    fn test_load_report_merge() {
        let mut r1 = LoadReport::new();
        r1.files_scanned = 10;
        r1.records_loaded = 100;

        let mut r2 = LoadReport::new();
        r2.files_scanned = 5;
        r2.files_failed = 1;
        r2.add_low("x", "y");

        r1.merge(r2);
        assert_eq!(r1.files_scanned, 15);
        assert_eq!(r1.files_failed, 1);
        assert_eq!(r1.records_loaded, 100);
        assert_eq!(r1.errors.len(), 1);
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new("test", 3, Duration::from_millis(50));
        assert!(breaker.before_call().is_ok());
        breaker.on_failure();
        breaker.on_failure();
        assert!(!breaker.is_open());
        breaker.on_failure();
        assert!(breaker.is_open());
        assert!(breaker.before_call().is_err());
    }

    #[test]
    fn test_circuit_breaker_recovers_after_timeout() {
        let mut breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        breaker.on_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.before_call().is_ok());
        breaker.on_success();
        assert!(!breaker.is_open());
    }
}
