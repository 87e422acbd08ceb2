//! OpenAI-compatible structured-output client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::limiter::RateLimiter;
use crate::llm::types::{
    CallTier, ChatMessage, CostTracker, StructuredRequest, StructuredResponse, TokenUsage,
};

/// Trait for LLM providers producing schema-constrained JSON.
///
/// The pipeline only ever talks to this seam, so tests substitute mock
/// implementations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Execute a structured completion and return the parsed JSON value.
    async fn call_structured(&self, request: StructuredRequest) -> Result<StructuredResponse>;

    /// Provider name for error reporting.
    fn provider(&self) -> &str {
        "unknown"
    }
}

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used for plain generation calls.
    pub model: String,
    /// Model used when `extended_reasoning` is requested. Falls back to
    /// `model` when unset.
    pub reasoning_model: Option<String>,
    pub timeout: Duration,
    /// Total budget for transport-error backoff before giving up.
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            reasoning_model: None,
            timeout: Duration::from_secs(120),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_reasoning_model(mut self, model: impl Into<String>) -> Self {
        self.reasoning_model = Some(model.into());
        self
    }
}

/// Client for any chat-completions endpoint supporting `json_schema`
/// response formats. All calls pass through the shared rate limiter;
/// transport errors are retried with exponential backoff capped by
/// `max_backoff` total elapsed time. Model-level failures are not retried
/// here.
pub struct OpenAiCompatClient {
    config: ClientConfig,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    costs: Mutex<CostTracker>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    #[serde(default)]
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(config: ClientConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = build_http_client(config.timeout)?;
        Ok(Self {
            config,
            http,
            limiter,
            costs: Mutex::new(CostTracker::new()),
        })
    }

    /// Snapshot of accumulated token usage and cost.
    pub fn cost_tracker(&self) -> CostTracker {
        self.costs.lock().map(|c| *c).unwrap_or_default()
    }

    fn model_for(&self, tier: CallTier) -> &str {
        match tier {
            CallTier::Generation => &self.config.model,
            CallTier::Reasoning => self
                .config
                .reasoning_model
                .as_deref()
                .unwrap_or(&self.config.model),
        }
    }

    fn record_usage(&self, tier: CallTier, usage: TokenUsage) {
        if let Ok(mut costs) = self.costs.lock() {
            costs.record(tier, usage);
        }
    }

    fn payload(&self, request: &StructuredRequest) -> Value {
        json!({
            "model": self.model_for(request.tier()),
            "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "seed": request.seed,
            "max_completion_tokens": request.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                }
            }
        })
    }

    async fn attempt(&self, request: &StructuredRequest) -> Result<StructuredResponse> {
        self.limiter.acquire().await;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout.as_millis() as u64)
                } else {
                    Error::llm_api("openai", format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("openai", format!("failed to read response: {e}")))?;

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::llm_api(
                "openai",
                format!("HTTP {status}: {body}"),
            ));
        }
        if !status.is_success() {
            // Client errors (bad schema, auth) will not improve on retry.
            return Err(Error::Llm(format!("HTTP {status}: {body}")));
        }

        let completion: WireCompletion = serde_json::from_str(&body)?;
        let usage = completion
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        // Truncated completions still consumed tokens.
        self.record_usage(request.tier(), usage);

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("completion contained no choices".into()))?;

        if choice.finish_reason.as_deref() == Some("length") {
            return Err(Error::LengthLimit {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            });
        }
        if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
            return Err(Error::Llm(format!("model refused: {refusal}")));
        }

        let content = choice
            .message
            .content
            .ok_or_else(|| Error::Llm("completion message had no content".into()))?;
        let value: Value = serde_json::from_str(&content)?;

        Ok(StructuredResponse::new(value, usage, completion.model))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn call_structured(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let started = std::time::Instant::now();
        let mut delay = Duration::from_secs(1);
        loop {
            match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable_transport() => {
                    if started.elapsed() + delay > self.config.max_backoff {
                        warn!("giving up after {:?} of backoff: {err}", started.elapsed());
                        return Err(err);
                    }
                    debug!("transport error, retrying in {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

fn message_json(message: &ChatMessage) -> Value {
    json!({
        "role": match message.role {
            crate::llm::types::ChatRole::System => "system",
            crate::llm::types::ChatRole::User => "user",
            crate::llm::types::ChatRole::Assistant => "assistant",
        },
        "content": message.content,
    })
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reasoning_model_falls_back_to_generation_model() {
        let limiter = Arc::new(RateLimiter::default_llm());
        let client = OpenAiCompatClient::new(
            ClientConfig::new("key").with_model("gen-model"),
            limiter.clone(),
        )
        .unwrap();
        assert_eq!(client.model_for(CallTier::Reasoning), "gen-model");

        let client = OpenAiCompatClient::new(
            ClientConfig::new("key")
                .with_model("gen-model")
                .with_reasoning_model("deep-model"),
            limiter,
        )
        .unwrap();
        assert_eq!(client.model_for(CallTier::Reasoning), "deep-model");
    }

    #[test]
    fn payload_carries_schema_and_strictness() {
        let limiter = Arc::new(RateLimiter::default_llm());
        let client =
            OpenAiCompatClient::new(ClientConfig::new("key").with_model("m"), limiter).unwrap();
        let request = StructuredRequest::new(
            vec![ChatMessage::user("generate")],
            "test_generation_result",
            json!({"type": "object", "properties": {}, "required": [], "additionalProperties": false}),
        );
        let payload = client.payload(&request);
        assert_eq!(payload["model"], "m");
        assert_eq!(payload["seed"], 42);
        assert_eq!(
            payload["response_format"]["json_schema"]["name"],
            "test_generation_result"
        );
        assert_eq!(payload["response_format"]["json_schema"]["strict"], true);
    }
}
