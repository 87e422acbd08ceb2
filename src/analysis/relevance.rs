//! LLM mapping of requirements to relevant statement groups.

use serde_json::{json, Value};

use crate::analysis::statements::{
    executable_statement_groups, is_path_prefix, StatementGroup,
};
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient, StructuredRequest};

const MAX_REQUIREMENTS_PER_CALL: usize = 100;

/// For each requirement description, the statement groups of
/// `function_body` that matter for testing it, sorted by line number.
///
/// One structured call covers up to 100 requirements; longer lists are
/// chunked. Groups sharing symbols with a selected group along a guarding
/// path prefix are pulled in as related context.
pub async fn relevant_statement_groups(
    client: &dyn LlmClient,
    function_body: &str,
    requirements: &[String],
) -> Result<Vec<Vec<StatementGroup>>> {
    if requirements.is_empty() {
        return Ok(Vec::new());
    }
    let all_groups = executable_statement_groups(function_body)?;
    let mut results = Vec::with_capacity(requirements.len());
    for chunk in requirements.chunks(MAX_REQUIREMENTS_PER_CALL) {
        results.extend(select_for_chunk(client, function_body, &all_groups, chunk).await?);
    }
    Ok(results)
}

fn selection_schema(count: usize) -> (Value, Vec<String>) {
    let keys: Vec<String> = (1..=count)
        .map(|i| format!("group_indices_for_requirement_{i}"))
        .collect();
    let mut properties = serde_json::Map::new();
    for key in &keys {
        properties.insert(
            key.clone(),
            json!({"type": "array", "items": {"type": "integer"}}),
        );
    }
    let schema = json!({
        "type": "object",
        "properties": properties,
        "required": keys,
        "additionalProperties": false,
    });
    (schema, keys)
}

async fn select_for_chunk(
    client: &dyn LlmClient,
    function_body: &str,
    all_groups: &[StatementGroup],
    requirements: &[String],
) -> Result<Vec<Vec<StatementGroup>>> {
    let requirements_text: Vec<String> = requirements
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {r}", i + 1))
        .collect();
    let groups_text: Vec<String> = all_groups
        .iter()
        .enumerate()
        .map(|(i, g)| format!("{}. {}", i + 1, g.render(function_body)))
        .collect();

    let prompt = format!(
        "Given the following code and a list of semantic parts of the code, identify the \
         relevant parts of the code that are necessary to test the following requirements. \
         Return a list of indices of the relevant parts of the code for each requirement.\n\n\
         Code:\n```c\n{function_body}\n```\n\n\
         Semantic parts:\n{}\n\n\
         Requirements:\n{}\n",
        groups_text.join("\n"),
        requirements_text.join("\n"),
    );
    let (schema, keys) = selection_schema(requirements.len());
    let request = StructuredRequest::new(
        vec![
            ChatMessage::system(
                "You are a world-class software engineer specializing in requirements engineering.",
            ),
            ChatMessage::user(prompt),
        ],
        "statement_group_selection",
        schema,
    );
    let response = client.call_structured(request).await?;

    let mut results = Vec::with_capacity(keys.len());
    for key in keys {
        let indices: Vec<usize> = response.value[&key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(|i| i as usize)
                    .collect()
            })
            .unwrap_or_default();
        let mut selected: Vec<StatementGroup> = indices
            .into_iter()
            .filter(|i| (1..=all_groups.len()).contains(i))
            .map(|i| all_groups[i - 1].clone())
            .collect();
        add_related(&mut selected, all_groups);
        selected.sort_by_key(|g| g.line_numbers.first().copied().unwrap_or(usize::MAX));
        results.push(selected);
    }
    Ok(results)
}

/// Pull in groups that share a symbol with a selected group and guard it
/// (their path is a prefix of the selected group's path).
fn add_related(selected: &mut Vec<StatementGroup>, all_groups: &[StatementGroup]) {
    let baseline = selected.clone();
    for other in all_groups {
        if selected.contains(other) {
            continue;
        }
        let related = baseline.iter().any(|group| {
            group
                .symbols
                .iter()
                .any(|s| other.symbols.contains(s) && is_path_prefix(&other.path, &group.path))
        });
        if related {
            selected.push(other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::{StructuredResponse, TokenUsage};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedSelection(Value);

    #[async_trait]
    impl LlmClient for FixedSelection {
        async fn call_structured(
            &self,
            request: StructuredRequest,
        ) -> crate::error::Result<StructuredResponse> {
            // The schema must name one key per requirement.
            let required = request.schema["required"].as_array().unwrap().len();
            assert_eq!(required, self.0.as_object().unwrap().len());
            Ok(StructuredResponse::new(
                self.0.clone(),
                TokenUsage::default(),
                "mock",
            ))
        }
    }

    const CODE: &str = "\
int clamp_value(int raw) {
    int limit = read_limit();
    if (raw > limit) {
        log_event(limit);
        return limit;
    }
    scale(limit);
    return raw;
}
";

    #[tokio::test]
    async fn maps_indices_and_adds_related_groups() {
        let client = FixedSelection(json!({
            "group_indices_for_requirement_1": [1],
            "group_indices_for_requirement_2": [99],
        }));
        let results = relevant_statement_groups(
            &client,
            CODE,
            &["guarded return".to_string(), "bogus".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        // Requirement 1 selected the guarded group; the trailing group
        // shares `limit` and has a prefix path, so it comes along.
        assert!(results[0].len() >= 2);
        assert!(results[0]
            .iter()
            .any(|g| g.path == vec!["IF (raw > limit) ==> TRUE".to_string()]));
        // Sorted by first line.
        let firsts: Vec<usize> = results[0]
            .iter()
            .map(|g| g.line_numbers[0])
            .collect();
        let mut sorted = firsts.clone();
        sorted.sort_unstable();
        assert_eq!(firsts, sorted);
        // Out-of-range indices are dropped.
        assert!(results[1].is_empty());
    }
}
