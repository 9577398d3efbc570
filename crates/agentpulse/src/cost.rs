//! Model pricing lookup.
//!
//! A fixed table of USD-per-1K-token prices. Auto-instrumentation shims call
//! [`calculate_cost`] with the usage reported by the provider and attach the
//! result to the LLM span.

/// Per-1K-token pricing for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelCost {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Known model prices, USD per 1K tokens.
pub const MODEL_COSTS: &[(&str, ModelCost)] = &[
    ("gpt-4o", ModelCost { input_per_1k: 0.0025, output_per_1k: 0.01 }),
    ("gpt-4o-mini", ModelCost { input_per_1k: 0.00015, output_per_1k: 0.0006 }),
    ("gpt-4-turbo", ModelCost { input_per_1k: 0.01, output_per_1k: 0.03 }),
    ("gpt-4", ModelCost { input_per_1k: 0.03, output_per_1k: 0.06 }),
    ("gpt-3.5-turbo", ModelCost { input_per_1k: 0.0005, output_per_1k: 0.0015 }),
    ("claude-3-5-sonnet-20241022", ModelCost { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-5-haiku-20241022", ModelCost { input_per_1k: 0.0008, output_per_1k: 0.004 }),
    ("claude-3-opus-20240229", ModelCost { input_per_1k: 0.015, output_per_1k: 0.075 }),
    ("claude-3-sonnet-20240229", ModelCost { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-haiku-20240307", ModelCost { input_per_1k: 0.00025, output_per_1k: 0.00125 }),
];

/// Cost in USD for one model call. Exact match first, then the first
/// bidirectional prefix match (dated model variants resolve to their base
/// entry); unknown models cost 0.0.
pub fn calculate_cost(model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
    let cost = MODEL_COSTS
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| {
            MODEL_COSTS
                .iter()
                .find(|(name, _)| model.starts_with(name) || name.starts_with(model))
        })
        .map(|(_, cost)| cost);

    match cost {
        Some(cost) => {
            (tokens_in as f64 * cost.input_per_1k + tokens_out as f64 * cost.output_per_1k)
                / 1000.0
        }
        None => 0.0,
    }
}
