//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token. Used only for usage records;
//! nothing in the pipeline branches on cost.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// Gemini 2.0 Flash: $0.10/1M input, $0.40/1M output
const GEMINI_20_FLASH: ModelPricing = ModelPricing::new(100, 400);
// Claude 3.5 Sonnet: $3.00/1M input, $15.00/1M output
const CLAUDE_35_SONNET: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);

/// Fallback for models missing from the table.
const UNKNOWN_MODEL: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("google/gemini-2.0-flash-001", GEMINI_20_FLASH);
    map.insert("google/gemini-2.0-flash", GEMINI_20_FLASH);
    map.insert("anthropic/claude-3.5-sonnet", CLAUDE_35_SONNET);
    map.insert("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU);
    map.insert("openai/gpt-4o-mini", GPT_4O_MINI);
    map
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model_id).copied()
}

/// Estimated chat cost; unknown models are priced as a mid-range model.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(UNKNOWN_MODEL)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost_known_model() {
        // 1K input * 100 + 1K output * 400 = 500,000 nanos
        assert_eq!(chat_cost("google/gemini-2.0-flash-001", 1_000, 1_000), 500_000);
    }

    #[test]
    fn test_chat_cost_unknown_model_uses_fallback() {
        assert_eq!(chat_cost("someone/new-model", 10, 10), 60_000);
    }
}
