//! LLM transport: structured-output client, rate limiting, caching, replay.

pub mod cache;
pub mod client;
pub mod limiter;
pub mod types;

pub use cache::{ReplayClient, RequestCache, RequestReplay, StoredResponse};
pub use client::{ClientConfig, LlmClient, OpenAiCompatClient};
pub use limiter::RateLimiter;
pub use types::{
    CallTier, ChatMessage, ChatRole, CostBreakdown, CostTracker, StructuredRequest,
    StructuredResponse, TokenUsage,
};
