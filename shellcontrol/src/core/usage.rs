//! Token usage and cost accounting for planner calls.

use serde::{Deserialize, Serialize};

/// Tokens consumed by one planner call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Cumulative usage as recorded in conversation logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
}

/// Accumulates usage across a session.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageTracker {
    pricing: Pricing,
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl UsageTracker {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn add(&mut self, usage: TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
    }

    pub fn report(&self) -> UsageReport {
        let prompt_cost = self.prompt_tokens as f64 / 1_000_000.0 * self.pricing.input_per_million;
        let completion_cost =
            self.completion_tokens as f64 / 1_000_000.0 * self.pricing.output_per_million;
        UsageReport {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.report().total_cost
    }
}

impl UsageReport {
    pub fn summary(&self) -> String {
        format!(
            "Tokens: {} sent + {} received = {} total\nTotal cost: USD {:.4}",
            self.prompt_tokens,
            self.completion_tokens,
            self.prompt_tokens + self.completion_tokens,
            self.total_cost
        )
    }
}
