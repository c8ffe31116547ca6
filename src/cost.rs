//! Cost calculation from per-token prices.

use crate::types::Usage;
use serde::{Deserialize, Serialize};

/// Cost in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cost {
    /// Cost for input tokens in USD.
    pub input_cost: f64,
    /// Cost for output tokens in USD.
    pub output_cost: f64,
}

impl Cost {
    /// Total cost in USD.
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

/// Price per token for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Price per input token.
    pub input_tokens: f64,
    /// Price per output token.
    pub output_tokens: f64,
}

impl ModelPrice {
    pub const fn new(input_tokens: f64, output_tokens: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Cost of a call with these token counts.
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> Cost {
        Cost {
            input_cost: self.input_tokens * f64::from(input_tokens),
            output_cost: self.output_tokens * f64::from(output_tokens),
        }
    }

    /// Cost of reported usage.
    pub fn calculate(&self, usage: &Usage) -> Cost {
        self.estimate(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate() {
        let price = ModelPrice::new(0.001, 0.002);
        let cost = price.estimate(100, 50);
        assert!((cost.input_cost - 0.1).abs() < 1e-10);
        assert!((cost.output_cost - 0.1).abs() < 1e-10);
        assert!((cost.total() - 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_calculate_from_usage() {
        let price = ModelPrice::new(1e-6, 2e-6);
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
        };
        let cost = price.calculate(&usage);
        assert!((cost.total() - 0.002).abs() < 1e-10);
    }
}
