//! Model pricing catalog (C1).
//!
//! Grounded on the teacher's `pricing/mod.rs` + `pricing/embedded.rs`
//! (an embedded `once_cell::sync::Lazy` table merged with an optional
//! on-disk override, `calculate_cost` formula with separate cache
//! read/write multipliers). The teacher's network-fetched LiteLLM cache
//! is dropped: remote pricing sources are an external collaborator per
//! this repo's scope, so only a local override file is merged in.

use crate::models::UsageRecord;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Per-model price table, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub cache_read_multiplier: f64,
    pub cache_write_multiplier: f64,
}

impl ModelPricing {
    pub fn new(input_price_per_million: f64, output_price_per_million: f64) -> Self {
        Self {
            input_price_per_million,
            output_price_per_million,
            cache_read_multiplier: 0.1,
            cache_write_multiplier: 0.25,
        }
    }
}

static EMBEDDED_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("claude-opus-4", ModelPricing::new(15.0, 75.0));
    m.insert("claude-sonnet-4", ModelPricing::new(3.0, 15.0));
    m.insert("claude-haiku-4", ModelPricing::new(1.0, 5.0));
    m.insert("claude-3-opus", ModelPricing::new(15.0, 75.0));
    m.insert("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0));
    m.insert("claude-3-sonnet", ModelPricing::new(3.0, 15.0));
    m.insert("claude-3-5-haiku", ModelPricing::new(0.80, 4.0));
    m.insert("claude-3-haiku", ModelPricing::new(0.25, 1.25));
    m
});

/// Override table populated from an on-disk pricing file at startup;
/// empty by default.
static DYNAMIC_PRICING: Lazy<RwLock<HashMap<String, ModelPricing>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Merge a local pricing override file (JSON map of model id to
/// `{input_price_per_million, output_price_per_million}`) on top of the
/// embedded table. Missing or malformed files are ignored; this is a
/// best-effort enrichment, not a required input.
pub fn load_overrides(path: &Path) -> std::io::Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&text)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut loaded = 0;
    let mut table = DYNAMIC_PRICING.write();
    for (model, value) in parsed {
        let input = value.get("input_price_per_million").and_then(|v| v.as_f64());
        let output = value.get("output_price_per_million").and_then(|v| v.as_f64());
        if let (Some(input), Some(output)) = (input, output) {
            table.insert(model, ModelPricing::new(input, output));
            loaded += 1;
        }
    }
    Ok(loaded)
}

pub fn clear_overrides() {
    DYNAMIC_PRICING.write().clear();
}

/// Resolve pricing for a model id, checking overrides then the
/// embedded table by exact match then by prefix (so dated suffixes like
/// `claude-sonnet-4-20250514` resolve to their family). Returns `None`
/// on a catalog miss; callers never substitute a guessed price for an
/// unrecognized id, per this repo's zero-cost-on-unknown contract.
pub fn get_model_pricing(model_id: &str) -> Option<ModelPricing> {
    if let Some(p) = DYNAMIC_PRICING.read().get(model_id) {
        return Some(*p);
    }
    if let Some(p) = EMBEDDED_PRICING.get(model_id) {
        return Some(*p);
    }
    for (prefix, pricing) in EMBEDDED_PRICING.iter() {
        if model_id.starts_with(prefix) {
            return Some(*pricing);
        }
    }
    None
}

/// How aggressively the pipeline trusts a record's self-reported cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostMode {
    /// Use the record's cost if present and nonzero, else compute.
    #[default]
    Auto,
    /// Always recompute from the pricing table, ignoring any reported cost.
    ForceCompute,
    /// Always trust the record's reported cost (0.0 if absent).
    TrustRecord,
}

/// Compute the cost in USD for a single usage record under the given mode.
pub fn cost_of(record: &UsageRecord, mode: CostMode) -> f64 {
    match mode {
        CostMode::TrustRecord => record.cost_usd.unwrap_or(0.0),
        CostMode::Auto => match record.cost_usd {
            Some(c) if c != 0.0 => c,
            _ => compute_cost(record),
        },
        CostMode::ForceCompute => compute_cost(record),
    }
}

fn compute_cost(record: &UsageRecord) -> f64 {
    let Some(pricing) = get_model_pricing(&record.model) else {
        return 0.0;
    };
    let input_cost = record.prompt_tokens as f64 / 1_000_000.0 * pricing.input_price_per_million;
    let output_cost = record.completion_tokens as f64 / 1_000_000.0 * pricing.output_price_per_million;
    let cache_write_cost = record.cache_creation_tokens as f64 / 1_000_000.0
        * pricing.input_price_per_million
        * pricing.cache_write_multiplier;
    let cache_read_cost = record.cache_read_tokens as f64 / 1_000_000.0
        * pricing.input_price_per_million
        * pricing.cache_read_multiplier;
    input_cost + output_cost + cache_write_cost + cache_read_cost
}
