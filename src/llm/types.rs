//! Request/response types for structured LLM calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Which model tier a call is billed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallTier {
    /// The default generation model.
    Generation,
    /// The extended-reasoning model used on retries.
    Reasoning,
}

/// A structured-output completion request.
///
/// `schema` is a JSON Schema object the model's output must validate
/// against; the provider enforces it via structured outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    pub messages: Vec<ChatMessage>,
    pub schema_name: String,
    pub schema: Value,
    pub temperature: f64,
    pub seed: u64,
    pub max_tokens: u32,
    pub extended_reasoning: bool,
}

impl StructuredRequest {
    pub fn new(messages: Vec<ChatMessage>, schema_name: impl Into<String>, schema: Value) -> Self {
        Self {
            messages,
            schema_name: schema_name.into(),
            schema,
            temperature: 0.0,
            seed: 42,
            max_tokens: 5000,
            extended_reasoning: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_extended_reasoning(mut self, extended_reasoning: bool) -> Self {
        self.extended_reasoning = extended_reasoning;
        self
    }

    pub fn tier(&self) -> CallTier {
        if self.extended_reasoning {
            CallTier::Reasoning
        } else {
            CallTier::Generation
        }
    }
}

/// Token counts for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// The parsed result of a structured completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    /// JSON value conforming to the request schema.
    pub value: Value,
    pub usage: TokenUsage,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl StructuredResponse {
    pub fn new(value: Value, usage: TokenUsage, model: impl Into<String>) -> Self {
        Self {
            value,
            usage,
            model: model.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-tier cost summary in dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
}

// Per-1k-token pricing for the two tiers.
const GENERATION_INPUT_PER_1K: f64 = 0.00275;
const GENERATION_OUTPUT_PER_1K: f64 = 0.011;
const REASONING_INPUT_PER_1K: f64 = 0.0011;
const REASONING_OUTPUT_PER_1K: f64 = 0.0044;

/// Accumulates token usage per model tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTracker {
    pub generation: TokenUsage,
    pub reasoning: TokenUsage,
    pub request_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage for one completion on the given tier.
    pub fn record(&mut self, tier: CallTier, usage: TokenUsage) {
        let slot = match tier {
            CallTier::Generation => &mut self.generation,
            CallTier::Reasoning => &mut self.reasoning,
        };
        slot.input_tokens += usage.input_tokens;
        slot.output_tokens += usage.output_tokens;
        self.request_count += 1;
    }

    pub fn generation_cost(&self) -> CostBreakdown {
        CostBreakdown {
            input_tokens: self.generation.input_tokens,
            output_tokens: self.generation.output_tokens,
            input_cost: self.generation.input_tokens as f64 / 1000.0 * GENERATION_INPUT_PER_1K,
            output_cost: self.generation.output_tokens as f64 / 1000.0 * GENERATION_OUTPUT_PER_1K,
        }
    }

    pub fn reasoning_cost(&self) -> CostBreakdown {
        CostBreakdown {
            input_tokens: self.reasoning.input_tokens,
            output_tokens: self.reasoning.output_tokens,
            input_cost: self.reasoning.input_tokens as f64 / 1000.0 * REASONING_INPUT_PER_1K,
            output_cost: self.reasoning.output_tokens as f64 / 1000.0 * REASONING_OUTPUT_PER_1K,
        }
    }

    /// Total dollar cost across both tiers.
    pub fn total_cost(&self) -> f64 {
        let g = self.generation_cost();
        let r = self.reasoning_cost();
        g.input_cost + g.output_cost + r.input_cost + r.output_cost
    }
}
