//! Percentile and basic distribution statistics used by the limit
//! engine (C9) to derive an adaptive cost limit from historical session
//! totals.
//!
//! Grounded on the teacher's `analytics/anomalies.rs` (`Statistics`
//! struct computing mean/std_dev, Z-score outlier flagging over a
//! sliding window), generalized here into linear-interpolated
//! percentiles plus an IQR-based outlier filter.

#[derive(Debug, Clone, Copy, Default)]
pub struct Distribution {
    pub mean: f64,
    pub stddev: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: usize,
}

/// Reasons a sample set is judged too thin or too skewed to be trusted
/// for an adaptive limit; the caller falls back to the plan default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQualityIssue {
    TooFewSamples,
    MostlyZero,
    LowVariability,
    TooManyExtremeOutliers,
}

/// Linear-interpolated percentile over a sorted copy of `samples`.
/// Returns 0.0 for an empty slice.
pub fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    percentile_sorted(&sorted, pct)
}

fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

pub fn stddev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Computes the full [`Distribution`] over `samples` (order-independent).
pub fn compute_distribution(samples: &[f64]) -> Distribution {
    if samples.is_empty() {
        return Distribution::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Distribution {
        mean: mean(samples),
        stddev: stddev(samples),
        p25: percentile_sorted(&sorted, 25.0),
        p75: percentile_sorted(&sorted, 75.0),
        p90: percentile_sorted(&sorted, 90.0),
        p95: percentile_sorted(&sorted, 95.0),
        p99: percentile_sorted(&sorted, 99.0),
        sample_count: samples.len(),
    }
}

/// Drops samples more than 1.5*IQR outside [p25, p75], the classic
/// Tukey fence. Returns the filtered set; caller decides whether the
/// drop rate itself is a quality issue.
pub fn remove_iqr_outliers(samples: &[f64]) -> Vec<f64> {
    if samples.len() < 4 {
        return samples.to_vec();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q1 = percentile_sorted(&sorted, 25.0);
    let q3 = percentile_sorted(&sorted, 75.0);
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;
    samples.iter().copied().filter(|x| *x >= low && *x <= high).collect()
}

/// Flags reasons this sample set shouldn't drive an adaptive limit.
/// Mirrors the teacher's sanity checks before trusting a statistic
/// computed over a short or degenerate window.
pub fn validate_data_quality(samples: &[f64]) -> Vec<DataQualityIssue> {
    let mut issues = Vec::new();
    if samples.len() < 10 {
        issues.push(DataQualityIssue::TooFewSamples);
        return issues;
    }

    let zero_count = samples.iter().filter(|x| **x == 0.0).count();
    if zero_count as f64 / samples.len() as f64 > 0.50 {
        issues.push(DataQualityIssue::MostlyZero);
    }

    let sd = stddev(samples);
    let m = mean(samples);
    if m > 0.0 && sd / m < 0.05 {
        issues.push(DataQualityIssue::LowVariability);
    }

    let filtered = remove_iqr_outliers(samples);
    let dropped = samples.len() - filtered.len();
    if dropped as f64 / samples.len() as f64 > 0.10 {
        issues.push(DataQualityIssue::TooManyExtremeOutliers);
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_matches_known_values() {
        let samples: Vec<f64> = (1..=10).map(|n| n as f64).collect();
        assert_eq!(percentile(&samples, 50.0), 5.5);
        assert_eq!(percentile(&samples, 100.0), 10.0);
        assert_eq!(percentile(&samples, 0.0), 1.0);
    }

    #[test]
    fn test_percentile_empty_is_zero() {
        assert_eq!(percentile(&[], 90.0), 0.0);
    }

    #[test]
    fn test_iqr_removes_extreme_outlier() {
        let mut samples: Vec<f64> = (1..=20).map(|n| n as f64).collect();
        samples.push(10_000.0);
        let filtered = remove_iqr_outliers(&samples);
        assert!(!filtered.contains(&10_000.0));
    }

    #[test]
    fn test_quality_flags_too_few_samples() {
        let issues = validate_data_quality(&[1.0, 2.0, 3.0]);
        assert!(issues.contains(&DataQualityIssue::TooFewSamples));
    }

    #[test]
    fn test_quality_flags_mostly_zero() {
        let mut samples = vec![0.0; 8];
        samples.extend([1.0, 2.0]);
        let issues = validate_data_quality(&samples);
        assert!(issues.contains(&DataQualityIssue::MostlyZero));
    }

    #[test]
    fn test_quality_clean_data_has_no_issues() {
        let samples: Vec<f64> = (1..=20).map(|n| n as f64 + (n % 3) as f64).collect();
        let issues = validate_data_quality(&samples);
        assert!(issues.is_empty());
    }
}
