//! Pipeline configuration and environment-variable overrides.
//!
//! Grounded on the teacher's `models::config::Settings` (serde-deserialized
//! settings struct with a `#[serde(flatten)]` catch-all) and its layered
//! merge approach in `MergedConfig::from_layers`, adapted here to a single
//! flat config plus an explicit env-override table (no runtime reflection,
//! per this repo's Design Notes).

use crate::error::CoreError;
use crate::models::PlanType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub paths: Vec<PathBuf>,
    pub watch_interval_ms: u64,
    pub max_file_size_bytes: u64,
    pub deduplication: bool,
    pub pricing_source: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            watch_interval_ms: 500,
            max_file_size_bytes: 100 * 1024 * 1024,
            deduplication: true,
            pricing_source: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub plan: String,
    pub custom_cost_limit: Option<f64>,
    pub warn_threshold: f64,
    pub alert_threshold: f64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            plan: "pro".to_string(),
            custom_cost_limit: None,
            warn_threshold: 0.80,
            alert_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub notifications: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            notifications: vec!["desktop".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub worker_count: usize,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub max_memory_mb: usize,
    pub gc_interval_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            buffer_size: 100,
            batch_size: 50,
            max_memory_mb: 512,
            gc_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub subscription: SubscriptionConfig,
    pub limits: LimitsConfig,
    pub performance: PerformanceConfig,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(s).map_err(|e| CoreError::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.data.watch_interval_ms)
    }

    /// Validate cross-field invariants that plain deserialization cannot
    /// express (custom plan requires an explicit limit, thresholds ordered).
    pub fn validate(&self) -> Result<(), CoreError> {
        let plan = PlanType::parse(&self.subscription.plan).ok_or_else(|| CoreError::InvalidConfig {
            message: format!("unknown subscription.plan: {}", self.subscription.plan),
        })?;
        if plan == PlanType::Custom {
            match self.subscription.custom_cost_limit {
                Some(limit) if limit > 0.0 => {}
                _ => return Err(CoreError::MissingCustomLimit),
            }
        }
        if !(self.subscription.warn_threshold < self.subscription.alert_threshold) {
            return Err(CoreError::InvalidConfig {
                message: "subscription.warn_threshold must be < alert_threshold".to_string(),
            });
        }
        Ok(())
    }

    /// Apply one `<PREFIX>_<UPPER_SNAKE_PATH>` environment override.
    /// Returns `false` when `key` does not match a known field path.
    pub fn apply_env_override(&mut self, key: &str, value: &str) -> bool {
        match key {
            "DATA_WATCH_INTERVAL_MS" => parse_into(&mut self.data.watch_interval_ms, value),
            "DATA_MAX_FILE_SIZE_BYTES" => parse_into(&mut self.data.max_file_size_bytes, value),
            "DATA_DEDUPLICATION" => parse_into(&mut self.data.deduplication, value),
            "SUBSCRIPTION_PLAN" => {
                self.subscription.plan = value.to_string();
                true
            }
            "SUBSCRIPTION_CUSTOM_COST_LIMIT" => match value.parse() {
                Ok(v) => {
                    self.subscription.custom_cost_limit = Some(v);
                    true
                }
                Err(_) => false,
            },
            "SUBSCRIPTION_WARN_THRESHOLD" => parse_into(&mut self.subscription.warn_threshold, value),
            "SUBSCRIPTION_ALERT_THRESHOLD" => parse_into(&mut self.subscription.alert_threshold, value),
            "LIMITS_NOTIFICATIONS" => {
                self.limits.notifications = value.split(',').map(|s| s.trim().to_string()).collect();
                true
            }
            "PERFORMANCE_WORKER_COUNT" => parse_into(&mut self.performance.worker_count, value),
            "PERFORMANCE_BUFFER_SIZE" => parse_into(&mut self.performance.buffer_size, value),
            "PERFORMANCE_BATCH_SIZE" => parse_into(&mut self.performance.batch_size, value),
            "PERFORMANCE_MAX_MEMORY_MB" => parse_into(&mut self.performance.max_memory_mb, value),
            "PERFORMANCE_GC_INTERVAL_SECS" => parse_into(&mut self.performance.gc_interval_secs, value),
            _ => false,
        }
    }

    /// Apply every `<prefix>_*` variable found in the process environment.
    pub fn apply_env_overrides(&mut self, prefix: &str) -> Vec<String> {
        let mut applied = Vec::new();
        let full_prefix = format!("{prefix}_");
        for (name, value) in std::env::vars() {
            if let Some(key) = name.strip_prefix(&full_prefix) {
                if self.apply_env_override(key, &value) {
                    applied.push(name);
                }
            }
        }
        applied
    }
}

fn parse_into<T: std::str::FromStr>(field: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(v) => {
            *field = v;
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_plan_without_limit_fails_validation() {
        let mut config = Config::default();
        config.subscription.plan = "custom".to_string();
        assert!(matches!(config.validate(), Err(CoreError::MissingCustomLimit)));
    }

    #[test]
    fn test_unordered_thresholds_fail_validation() {
        let mut config = Config::default();
        config.subscription.warn_threshold = 0.9;
        config.subscription.alert_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_override_parses_typed_fields() {
        let mut config = Config::default();
        assert!(config.apply_env_override("DATA_WATCH_INTERVAL_MS", "1000"));
        assert_eq!(config.data.watch_interval_ms, 1000);
        assert!(config.apply_env_override("DATA_DEDUPLICATION", "false"));
        assert!(!config.data.deduplication);
        assert!(!config.apply_env_override("NOT_A_REAL_KEY", "x"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.performance.batch_size, config.performance.batch_size);
    }
}
