//! Requirement decomposition.
//!
//! Non-atomic requirements get split into atomic reformulations before
//! test generation. A single model sample is noisy about what counts as
//! atomic, so several samples vote; a split is kept only when enough of
//! them agree the requirement needs one.

use std::collections::HashMap;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient, StructuredRequest};
use crate::requirements::{Requirement, RequirementsCollection};

const SYSTEM_PROMPT: &str =
    "You are a world-class software engineer specializing in requirements engineering.";

/// Voting parameters.
#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    /// Number of parallel samples.
    pub samples: usize,
    /// Minimum fraction of samples that must split a requirement for the
    /// split to be kept.
    pub threshold_frequency: f64,
    /// One call per requirement instead of one call for the whole set.
    pub individual: bool,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            threshold_frequency: 0.2,
            individual: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SplitEntry {
    #[allow(dead_code)]
    original_requirement: String,
    original_requirement_index: usize,
    atomic_requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SetSelection {
    nonatomic_requirements: Vec<SplitEntry>,
}

#[derive(Debug, Deserialize)]
struct IndividualSelection {
    atomic_requirements: Vec<String>,
}

/// Decompose every requirement in the collection, keeping originals that
/// the vote considers atomic. Split requirements are replaced by children
/// keyed `parent.1`, `parent.2`, ... at the same location.
pub async fn decompose_requirements(
    client: &dyn LlmClient,
    requirements: &RequirementsCollection,
    config: &DecomposerConfig,
) -> Result<RequirementsCollection> {
    let originals: Vec<&Requirement> = requirements.iter().collect();
    if originals.is_empty() {
        return Ok(RequirementsCollection::default());
    }
    let descriptions: Vec<&str> = originals.iter().map(|r| r.description.as_str()).collect();

    // One map per sample: requirement index (0-based) to its atomic
    // reformulations. Failed samples vote "do not split" for everything.
    let samples: Vec<HashMap<usize, Vec<String>>> = if config.individual {
        individual_samples(client, &descriptions, config.samples).await
    } else {
        whole_set_samples(client, &descriptions, config.samples).await
    };

    let mut result = RequirementsCollection::default();
    for (index, original) in originals.iter().enumerate() {
        let splitting: Vec<&Vec<String>> =
            samples.iter().filter_map(|sample| sample.get(&index)).collect();
        let frequency = splitting.len() as f64 / config.samples.max(1) as f64;
        if frequency >= config.threshold_frequency {
            if let Some(atomics) = splitting.first() {
                for (child_index, description) in atomics.iter().enumerate() {
                    result.push(original.decomposed_child(child_index + 1, description.clone()))?;
                }
                continue;
            }
        }
        result.push((*original).clone())?;
    }
    Ok(result)
}

async fn whole_set_samples(
    client: &dyn LlmClient,
    descriptions: &[&str],
    samples: usize,
) -> Vec<HashMap<usize, Vec<String>>> {
    let calls = (0..samples).map(|attempt| async move {
        let request = set_request(descriptions).with_seed(42 + attempt as u64);
        match client.call_structured(request).await {
            Ok(response) => match serde_json::from_value::<SetSelection>(response.value) {
                Ok(selection) => split_map(selection, descriptions.len()),
                Err(e) => {
                    warn!("malformed decomposition response: {e}");
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!("decomposition sample failed: {e}");
                HashMap::new()
            }
        }
    });
    join_all(calls).await
}

async fn individual_samples(
    client: &dyn LlmClient,
    descriptions: &[&str],
    samples: usize,
) -> Vec<HashMap<usize, Vec<String>>> {
    let calls = (0..samples).map(|attempt| async move {
        let mut map = HashMap::new();
        for (index, description) in descriptions.iter().enumerate() {
            let request = individual_request(description).with_seed(42 + attempt as u64);
            match client.call_structured(request).await {
                Ok(response) => {
                    match serde_json::from_value::<IndividualSelection>(response.value) {
                        Ok(selection) if selection.atomic_requirements.len() > 1 => {
                            map.insert(index, selection.atomic_requirements);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("malformed decomposition response: {e}"),
                    }
                }
                Err(e) => warn!("decomposition sample failed: {e}"),
            }
        }
        map
    });
    join_all(calls).await
}

/// 1-based indices from the model become 0-based; entries that do not
/// actually split (fewer than two atomics) or point outside the set are
/// dropped.
fn split_map(selection: SetSelection, count: usize) -> HashMap<usize, Vec<String>> {
    let mut map = HashMap::new();
    for entry in selection.nonatomic_requirements {
        if entry.atomic_requirements.len() < 2 {
            continue;
        }
        if entry.original_requirement_index == 0 || entry.original_requirement_index > count {
            warn!(
                "decomposition referenced requirement {} of {count}",
                entry.original_requirement_index
            );
            continue;
        }
        map.entry(entry.original_requirement_index - 1)
            .or_insert(entry.atomic_requirements);
    }
    map
}

fn set_request(descriptions: &[&str]) -> StructuredRequest {
    let requirements_text: Vec<String> = descriptions
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}. {d}", i + 1))
        .collect();
    let prompt = format!(
        "Find non-atomic requirements in the given set of requirements and decompose them.\n\n\
         An atomic requirement is a singular, verifiable, and testable statement. It can be \
         directly validated by a single test case, following a unique execution path in the \
         software.\n\
         The requirements you receive may already be atomic or they may contain multiple \
         embedded requirements that need to be further decomposed into atomic statements such \
         that each one is testable using a single test case.\n\n\
         Requirements:\n{}\n\n\
         Exceptions:\n\
         Sometimes there are multiple test conditions that need to be checked to validate a \
         single requirement but this is possible using a single test case, i.e., a single run \
         of the function with some inputs and expected outputs is sufficient.\n\
         In such cases, the requirement should be considered atomic and therefore not added \
         to the output (even though it is technically composed of multiple test conditions).",
        requirements_text.join("\n"),
    );
    let schema = json!({
        "type": "object",
        "properties": {
            "nonatomic_requirements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original_requirement": {"type": "string"},
                        "original_requirement_index": {"type": "integer"},
                        "atomic_requirements": {
                            "type": "array",
                            "items": {"type": "string"},
                        },
                    },
                    "required": [
                        "original_requirement",
                        "original_requirement_index",
                        "atomic_requirements",
                    ],
                    "additionalProperties": false,
                },
            },
        },
        "required": ["nonatomic_requirements"],
        "additionalProperties": false,
    });
    StructuredRequest::new(
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        "requirement_decomposition",
        schema,
    )
    .with_temperature(1.0)
    .with_extended_reasoning(true)
}

fn individual_request(description: &str) -> StructuredRequest {
    let prompt = format!(
        "Create atomic requirements given this customer description: {description}\n\n\
         If the description is already atomic, return it unchanged as the only entry. \
         Sometimes there are multiple test conditions that need to be checked to validate a \
         single requirement but this is possible using a single test case; in such cases the \
         requirement is atomic and must not be split."
    );
    let schema = json!({
        "type": "object",
        "properties": {
            "atomic_requirements": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["atomic_requirements"],
        "additionalProperties": false,
    });
    StructuredRequest::new(
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        "requirement_decomposition",
        schema,
    )
    .with_temperature(1.0)
    .with_extended_reasoning(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StructuredResponse, TokenUsage};
    use crate::requirements::Location;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        responses: Vec<Value>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn call_structured(&self, _request: StructuredRequest) -> Result<StructuredResponse> {
            let index = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(StructuredResponse::new(
                self.responses[index % self.responses.len()].clone(),
                TokenUsage::default(),
                "mock",
            ))
        }
    }

    fn collection() -> RequirementsCollection {
        let mut collection = RequirementsCollection::default();
        collection
            .push(Requirement {
                key: "REQ-1".to_string(),
                id: "REQ-1".to_string(),
                title: "clamping".to_string(),
                description: "Clamps above the limit and scales below it.".to_string(),
                location: Location {
                    unit: "sensor".to_string(),
                    function: "clamp_value".to_string(),
                    lines: None,
                },
                original_key: None,
            })
            .unwrap();
        collection
            .push(Requirement {
                key: "REQ-2".to_string(),
                id: "REQ-2".to_string(),
                title: "identity".to_string(),
                description: "Returns the raw value unchanged.".to_string(),
                location: Location {
                    unit: "sensor".to_string(),
                    function: "clamp_value".to_string(),
                    lines: None,
                },
                original_key: None,
            })
            .unwrap();
        collection
    }

    fn split_response() -> Value {
        json!({
            "nonatomic_requirements": [{
                "original_requirement": "Clamps above the limit and scales below it.",
                "original_requirement_index": 1,
                "atomic_requirements": [
                    "Clamps values above the limit.",
                    "Scales values below the limit.",
                ],
            }]
        })
    }

    fn no_split_response() -> Value {
        json!({"nonatomic_requirements": []})
    }

    #[tokio::test]
    async fn majority_split_replaces_requirement_with_children() {
        let client = ScriptedClient {
            responses: vec![split_response()],
            next: AtomicUsize::new(0),
        };
        let config = DecomposerConfig {
            samples: 3,
            threshold_frequency: 0.5,
            individual: false,
        };
        let result = decompose_requirements(&client, &collection(), &config)
            .await
            .unwrap();

        let keys: Vec<&str> = result.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["REQ-1.1", "REQ-1.2", "REQ-2"]);
        let child = result.get("REQ-1.1").unwrap();
        assert_eq!(child.original_key.as_deref(), Some("REQ-1"));
        assert_eq!(child.location.function, "clamp_value");
        assert_eq!(child.description, "Clamps values above the limit.");
    }

    #[tokio::test]
    async fn minority_split_below_threshold_is_discarded() {
        // One of five samples splits; threshold 0.5 keeps the original.
        let client = ScriptedClient {
            responses: vec![
                split_response(),
                no_split_response(),
                no_split_response(),
                no_split_response(),
                no_split_response(),
            ],
            next: AtomicUsize::new(0),
        };
        let config = DecomposerConfig {
            samples: 5,
            threshold_frequency: 0.5,
            individual: false,
        };
        let result = decompose_requirements(&client, &collection(), &config)
            .await
            .unwrap();
        let keys: Vec<&str> = result.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["REQ-1", "REQ-2"]);
    }

    #[tokio::test]
    async fn single_atomic_output_means_no_split() {
        let response = json!({
            "nonatomic_requirements": [{
                "original_requirement": "Returns the raw value unchanged.",
                "original_requirement_index": 2,
                "atomic_requirements": ["Returns the raw value unchanged."],
            }]
        });
        let client = ScriptedClient {
            responses: vec![response],
            next: AtomicUsize::new(0),
        };
        let result =
            decompose_requirements(&client, &collection(), &DecomposerConfig::default())
                .await
                .unwrap();
        let keys: Vec<&str> = result.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["REQ-1", "REQ-2"]);
    }
}
