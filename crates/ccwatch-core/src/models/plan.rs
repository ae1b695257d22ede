//! Subscription plans and the warning-level ladder the limit engine
//! (C9) walks on each metrics update.
//!
//! Grounded on the teacher's `usage_estimator::SubscriptionPlan` (budget
//! table, `from_str` parsing) and `quota::AlertLevel`, generalized from a
//! fixed monthly budget to the spec's richer plan/reset-cycle model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Pro,
    Max5,
    Max20,
    Custom,
}

impl PlanType {
    /// Case-insensitive parse accepting the common separator variants
    /// ("max-5", "max_5", "max5") seen in real configs.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.to_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "free" => Some(PlanType::Free),
            "pro" => Some(PlanType::Pro),
            "max5" | "max5x" => Some(PlanType::Max5),
            "max20" | "max20x" => Some(PlanType::Max20),
            "custom" => Some(PlanType::Custom),
            _ => None,
        }
    }

    /// Predefined cost limit in USD for this plan; `None` for Free and
    /// Custom, which derive their limit elsewhere (Free has none, Custom
    /// comes from configuration or historical P90).
    pub fn default_cost_limit(&self) -> Option<f64> {
        match self {
            PlanType::Free => None,
            PlanType::Pro => Some(18.0),
            PlanType::Max5 => Some(35.0),
            PlanType::Max20 => Some(140.0),
            PlanType::Custom => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlanType::Free => "Free",
            PlanType::Pro => "Pro",
            PlanType::Max5 => "Max 5x",
            PlanType::Max20 => "Max 20x",
            PlanType::Custom => "Custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCycle {
    Daily,
    Weekly,
    Monthly,
}

/// An active plan configuration: type plus the resolved numeric limits.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub plan_type: PlanType,
    pub cost_limit: Option<f64>,
    pub token_limit: Option<u64>,
    /// Ascending warning thresholds, each a fraction of `cost_limit` in (0, 1].
    pub warning_levels: Vec<f64>,
    pub reset_cycle: ResetCycle,
}

impl Plan {
    pub fn new(plan_type: PlanType, custom_cost_limit: Option<f64>) -> Self {
        let cost_limit = match plan_type {
            PlanType::Custom => custom_cost_limit,
            other => other.default_cost_limit(),
        };
        Self {
            name: plan_type.display_name().to_string(),
            plan_type,
            cost_limit,
            token_limit: None,
            warning_levels: vec![0.50, 0.80, 0.95],
            reset_cycle: ResetCycle::Monthly,
        }
    }

    /// Percentage of the plan's cost limit currently consumed; `None`
    /// when the plan has no limit (Free with no custom override).
    pub fn percentage_used(&self, current_cost: f64) -> Option<f64> {
        self.cost_limit
            .filter(|limit| *limit > 0.0)
            .map(|limit| (current_cost / limit) * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_variants() {
        assert_eq!(PlanType::parse("max-5x"), Some(PlanType::Max5));
        assert_eq!(PlanType::parse("MAX_20"), Some(PlanType::Max20));
        assert_eq!(PlanType::parse("pro"), Some(PlanType::Pro));
        assert_eq!(PlanType::parse("bogus"), None);
    }

    #[test]
    fn test_default_cost_limits() {
        assert_eq!(PlanType::Pro.default_cost_limit(), Some(18.0));
        assert_eq!(PlanType::Free.default_cost_limit(), None);
    }

    #[test]
    fn test_percentage_used() {
        let plan = Plan::new(PlanType::Pro, None);
        assert_eq!(plan.percentage_used(9.0), Some(50.0));
    }

    #[test]
    fn test_custom_plan_requires_explicit_limit() {
        let plan = Plan::new(PlanType::Custom, Some(42.0));
        assert_eq!(plan.cost_limit, Some(42.0));
        let plan = Plan::new(PlanType::Custom, None);
        assert_eq!(plan.percentage_used(1.0), None);
    }
}
