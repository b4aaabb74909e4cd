//! Token cost estimation. Figures are informational and never authoritative.

use crate::llm::types::TokenUsage;

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

const PRICING: &[(&str, ModelPricing)] = &[
    ("gemini-2.5-pro", ModelPricing { input_per_million: 1.25, output_per_million: 5.00 }),
    ("gemini-2.5-flash", ModelPricing { input_per_million: 0.10, output_per_million: 0.40 }),
    ("gpt-4o", ModelPricing { input_per_million: 2.50, output_per_million: 10.00 }),
    ("gpt-4o-mini", ModelPricing { input_per_million: 0.15, output_per_million: 0.60 }),
    ("gpt-4.1", ModelPricing { input_per_million: 2.00, output_per_million: 8.00 }),
    ("gpt-4.1-mini", ModelPricing { input_per_million: 0.40, output_per_million: 1.60 }),
    ("o4-mini", ModelPricing { input_per_million: 1.10, output_per_million: 4.40 }),
];

pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Cost of `usage` on `model`; `None` when no input tokens were recorded.
/// Unknown models cost zero.
pub fn calculate_cost(model: &str, usage: &TokenUsage) -> Option<CostBreakdown> {
    if usage.input_tokens == 0 {
        return None;
    }
    let pricing = pricing_for(model).unwrap_or(ModelPricing {
        input_per_million: 0.0,
        output_per_million: 0.0,
    });
    let input_cost = round6(usage.input_tokens as f64 / 1_000_000.0 * pricing.input_per_million);
    let output_cost =
        round6(usage.output_tokens as f64 / 1_000_000.0 * pricing.output_per_million);
    Some(CostBreakdown {
        input_cost,
        output_cost,
        total_cost: round6(input_cost + output_cost),
    })
}
