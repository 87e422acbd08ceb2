//! Response cache and replay for LLM calls.
//!
//! Requests are keyed by a SHA-256 digest of their canonical JSON form:
//! object keys sorted, and schema names with a trailing `_<digits>` suffix
//! normalised by stripping the suffix (dynamically built schema names carry
//! a timestamp there). Stored files are append-only `{responses: [...]}`
//! arrays; replay cycles through the stored responses per key so repeated
//! identical calls observe the recorded sequence in order.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::client::LlmClient;
use crate::llm::types::{StructuredRequest, StructuredResponse, TokenUsage};

/// One stored completion for a request key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub schema_name: String,
    pub schema: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    responses: Vec<StoredResponse>,
}

/// Rewrite a JSON value into its canonical cache form: objects re-keyed
/// through a sorted map, schema-name strings stripped of trailing
/// `_<digits>` suffixes.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (normalize_name(k), canonicalize(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(normalize_name(s)),
        other => other.clone(),
    }
}

/// Strip a trailing `_<digits>` suffix, if present.
fn normalize_name(name: &str) -> String {
    match name.rsplit_once('_') {
        Some((stem, suffix)) if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) => {
            stem.to_string()
        }
        _ => name.to_string(),
    }
}

/// File-backed cache of structured responses keyed by request digest.
#[derive(Debug, Clone)]
pub struct RequestCache {
    cache_dir: PathBuf,
    cache_name: String,
}

impl RequestCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            cache_name: "cache".to_string(),
        })
    }

    /// Digest of the canonical form of the request inputs.
    pub fn input_hash(request: &StructuredRequest) -> Result<String> {
        let inputs = serde_json::json!({
            "messages": request.messages,
            "schema": request.schema,
            "schema_name": request.schema_name,
            "temperature": request.temperature,
            "seed": request.seed,
            "extended_reasoning": request.extended_reasoning,
        });
        let canonical = canonicalize(&inputs);
        let serialized = serde_json::to_string(&canonical)?;
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}_{hash}.json", self.cache_name))
    }

    fn load(&self, hash: &str) -> CacheFile {
        let path = self.path_for(hash);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => CacheFile::default(),
        }
    }

    fn save(&self, hash: &str, file: &CacheFile) -> Result<()> {
        let serialized = serde_json::to_string_pretty(file)?;
        std::fs::write(self.path_for(hash), serialized)?;
        Ok(())
    }

    /// Append a response under the request's key.
    pub fn store(&self, request: &StructuredRequest, response: StoredResponse) -> Result<()> {
        let hash = Self::input_hash(request)?;
        let mut file = self.load(&hash);
        file.responses.push(response);
        self.save(&hash, &file)
    }

    /// All responses recorded for the request, oldest first.
    pub fn responses(&self, request: &StructuredRequest) -> Result<Vec<StoredResponse>> {
        let hash = Self::input_hash(request)?;
        Ok(self.load(&hash).responses)
    }
}

/// Cycling replay over a [`RequestCache`].
#[derive(Debug)]
pub struct RequestReplay {
    cache: RequestCache,
    counters: Mutex<HashMap<String, usize>>,
}

impl RequestReplay {
    pub fn new(cache: RequestCache) -> Self {
        Self {
            cache,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Next recorded result for this request, cycling through the stored
    /// responses. Returns `None` when nothing is recorded.
    pub fn replay(&self, request: &StructuredRequest) -> Result<Option<Value>> {
        let hash = RequestCache::input_hash(request)?;
        let responses = self.cache.load(&hash).responses;
        if responses.is_empty() {
            return Ok(None);
        }
        let position = {
            let mut counters = self
                .counters
                .lock()
                .map_err(|_| Error::Internal("replay counter lock poisoned".into()))?;
            let slot = counters.entry(hash).or_insert(0);
            let position = *slot;
            *slot += 1;
            position
        };
        Ok(Some(responses[position % responses.len()].result.clone()))
    }

    /// Record a new response under the request's key (write-through).
    pub fn store(&self, request: &StructuredRequest, result: Value) -> Result<()> {
        self.cache.store(
            request,
            StoredResponse {
                schema_name: request.schema_name.clone(),
                schema: request.schema.clone(),
                result,
            },
        )
    }

    /// Restart all replay sequences from the beginning.
    pub fn reset(&self) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.clear();
        }
    }
}

/// An [`LlmClient`] that serves recorded responses when available and
/// writes through new ones.
pub struct ReplayClient<C> {
    inner: C,
    replay: RequestReplay,
}

impl<C: LlmClient> ReplayClient<C> {
    pub fn new(inner: C, replay: RequestReplay) -> Self {
        Self { inner, replay }
    }

    pub fn replay(&self) -> &RequestReplay {
        &self.replay
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for ReplayClient<C> {
    async fn call_structured(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        if let Some(value) = self.replay.replay(&request)? {
            debug!("serving cached response for schema {}", request.schema_name);
            return Ok(StructuredResponse::new(
                value,
                TokenUsage::default(),
                "replay",
            ));
        }
        let response = self.inner.call_structured(request.clone()).await?;
        self.replay.store(&request, response.value.clone())?;
        Ok(response)
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}
