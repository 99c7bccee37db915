//! Token usage tracking.
//!
//! Every generation, continuation and repair call reports input/output token
//! counts. They are aggregated per session with a rough cost estimate so the
//! client can see what a clone cost. Nothing here feeds back into control flow.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::Generation;

/// LLM pricing per million tokens (in USD)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Get pricing for a model identifier.
    ///
    /// Matching is by substring so provider prefixes such as
    /// `anthropic/claude-sonnet-4` resolve to the same entry.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_lowercase();
        let (input, output) = if lower.contains("opus") {
            (15.0, 75.0)
        } else if lower.contains("sonnet") {
            (3.0, 15.0)
        } else if lower.contains("haiku") {
            (0.8, 4.0)
        } else if lower.contains("gpt-4.1-mini") {
            (0.4, 1.6)
        } else if lower.contains("gpt-4.1-nano") {
            (0.1, 0.4)
        } else if lower.contains("gpt-4.1") {
            (2.0, 8.0)
        } else if lower.contains("gpt-4o-mini") {
            (0.15, 0.6)
        } else if lower.contains("gpt-4o") {
            (2.5, 10.0)
        } else {
            // Unknown - use conservative pricing
            (10.0, 30.0)
        };
        Self {
            input_per_million: input,
            output_per_million: output,
        }
    }

    /// Calculate cost for given token counts
    pub fn calculate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

/// A single LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Caller label ("worker-3", "compose", ...)
    pub label: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(label: impl Into<String>, model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        let model = model.into();
        let cost_usd = ModelPricing::for_model(&model).calculate(input_tokens, output_tokens);
        Self {
            label: label.into(),
            model,
            input_tokens,
            output_tokens,
            cost_usd,
            recorded_at: Utc::now(),
        }
    }

    pub fn from_generation(label: impl Into<String>, generation: &Generation) -> Self {
        Self::new(
            label,
            generation.model.clone(),
            generation.input_tokens,
            generation.output_tokens,
        )
    }
}

/// Aggregated usage for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Thread-safe accumulator shared by the tasks of one session.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: UsageRecord) {
        self.records.lock().push(record);
    }

    /// Record a generation under `label`.
    pub fn record_generation(&self, label: &str, generation: &Generation) {
        self.record(UsageRecord::from_generation(label, generation));
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }

    pub fn summary(&self) -> UsageSummary {
        let records = self.records.lock();
        records.iter().fold(UsageSummary::default(), |mut acc, r| {
            acc.calls += 1;
            acc.input_tokens += r.input_tokens;
            acc.output_tokens += r.output_tokens;
            acc.cost_usd += r.cost_usd;
            acc
        })
    }
}
