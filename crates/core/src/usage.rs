//! Token accounting and cost estimation.
//!
//! Prices are in USD per 1 million tokens and matched against the model id
//! by family, so both `anthropic.claude-3-haiku-20240307-v1:0` and
//! `claude-3-haiku-20240307` resolve to the same entry.

use serde::{Deserialize, Serialize};

/// Input/output/total token counts. Added to after every model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given usage.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

// Most specific family first.
const PRICES: &[(&str, ModelPricing)] = &[
    ("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0)),
    ("claude-3-5-haiku", ModelPricing::new(0.8, 4.0)),
    ("claude-3-7-sonnet", ModelPricing::new(3.0, 15.0)),
    ("claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
    ("claude-opus-4", ModelPricing::new(15.0, 75.0)),
    ("claude-3-haiku", ModelPricing::new(0.25, 1.25)),
    ("claude-3-sonnet", ModelPricing::new(3.0, 15.0)),
    ("claude-3-opus", ModelPricing::new(15.0, 75.0)),
];

/// Look up pricing for a model id. Returns None for unknown models.
pub fn pricing_for(model_id: &str) -> Option<ModelPricing> {
    let id = model_id.to_ascii_lowercase().replace('.', "-");
    PRICES
        .iter()
        .find(|(family, _)| id.contains(family))
        .map(|(_, p)| *p)
}

/// Estimated USD cost of `usage` on `model_id`.
pub fn estimate_cost(model_id: &str, usage: &TokenUsage) -> Option<f64> {
    pricing_for(model_id).map(|p| p.cost(usage))
}
