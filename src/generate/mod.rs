//! Test generation orchestration.
//!
//! Two paths produce test cases from requirements: one requirement per
//! LLM call with an iterative fix loop ([`single`]), and one call per
//! function covering a whole batch of requirements ([`batched`]), which
//! degrades to the single path per requirement when its slot misbehaves.

pub mod batched;
pub mod info;
pub mod single;

pub use info::{InfoLog, InfoRecord};

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use crate::alphabet::{self, AlphabetSet};
use crate::analysis::{prune_code, relevant_statement_groups};
use crate::context::ContextBuilder;
use crate::error::Result;
use crate::examples::ExampleSelector;
use crate::harness::{Harness, ReductionLevel};
use crate::llm::LlmClient;
use crate::requirements::{Requirement, RequirementsCollection};
use crate::schema::{BuiltSchema, SchemaBuilder};
use crate::testcase::{TestCase, ValueMapping};

pub(crate) const TEST_FRAMEWORK_REFERENCE: &str =
    include_str!("resources/test_framework_reference.md");

pub(crate) const GENERATION_SYSTEM_PROMPT: &str =
    "You are an AI assistant that generates test code for given requirements.";

/// Tunables fixed for the lifetime of a generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Functions at least this many lines long get their bodies pruned to
    /// requirement-relevant statements.
    pub min_prune_lines: usize,
    /// Include harness-generated example tests in prompts.
    pub use_test_examples: bool,
    /// Enable extended reasoning on batched calls and retries.
    pub use_extended_reasoning: bool,
    /// Fix-loop iterations per attempt.
    pub max_iterations: usize,
    /// Requirements per batched call.
    pub batch_size: usize,
    pub max_array_index: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_prune_lines: 500,
            use_test_examples: true,
            use_extended_reasoning: false,
            max_iterations: 3,
            batch_size: 8,
            max_array_index: 32,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Use the batched path where possible.
    pub batched: bool,
    /// Accept partial tests from the single path.
    pub allow_partial: bool,
    /// Accept partial tests directly from batched slots.
    pub allow_batch_partial: bool,
    /// Full restarts of the single path per requirement.
    pub max_retries: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            batched: true,
            allow_partial: false,
            allow_batch_partial: false,
            max_retries: 1,
        }
    }
}

type RelevantLines = HashMap<String, Vec<usize>>;

/// Generates test cases for a requirements collection against one harness
/// environment.
pub struct TestGenerator {
    pub(crate) harness: Arc<dyn Harness>,
    pub(crate) client: Arc<dyn LlmClient>,
    pub(crate) requirements: RequirementsCollection,
    pub(crate) context_builder: ContextBuilder,
    pub(crate) example_selector: ExampleSelector,
    pub(crate) info: InfoLog,
    pub(crate) config: GeneratorConfig,
    relevance: Mutex<HashMap<String, Arc<OnceCell<RelevantLines>>>>,
}

impl TestGenerator {
    pub fn new(
        harness: Arc<dyn Harness>,
        client: Arc<dyn LlmClient>,
        requirements: RequirementsCollection,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            context_builder: ContextBuilder::new(Arc::clone(&harness)),
            example_selector: ExampleSelector::new(Arc::clone(&harness)),
            harness,
            client,
            requirements,
            info: InfoLog::new(),
            config,
            relevance: Mutex::new(HashMap::new()),
        }
    }

    pub fn info(&self) -> &InfoLog {
        &self.info
    }

    pub fn requirements(&self) -> &RequirementsCollection {
        &self.requirements
    }

    /// Generate test cases for the given requirement keys. Results arrive
    /// in completion order; requirements that defy generation are absent.
    pub async fn generate_test_cases(
        &self,
        keys: &[String],
        options: &GenerateOptions,
    ) -> Vec<TestCase> {
        if keys.is_empty() {
            return Vec::new();
        }
        if options.batched {
            let batches = self.group_into_batches(keys);
            let mut pending: FuturesUnordered<_> = batches
                .iter()
                .map(|batch| self.generate_batch(batch, options))
                .collect();
            let mut results = Vec::new();
            while let Some(mut batch_results) = pending.next().await {
                results.append(&mut batch_results);
            }
            results
        } else {
            let mut pending: FuturesUnordered<_> = keys
                .iter()
                .map(|key| self.generate_test_case(key, options, false))
                .collect();
            let mut results = Vec::new();
            while let Some(result) = pending.next().await {
                results.extend(result);
            }
            results
        }
    }

    /// Group keys by the function they target, then chunk by batch size.
    fn group_into_batches(&self, keys: &[String]) -> Vec<Vec<String>> {
        let mut order: Vec<String> = Vec::new();
        let mut by_function: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            let function = self
                .requirements
                .get(key)
                .map(|r| r.location.function.clone())
                .unwrap_or_default();
            if !by_function.contains_key(&function) {
                order.push(function.clone());
            }
            by_function.entry(function).or_default().push(key.clone());
        }
        let mut batches = Vec::new();
        for function in order {
            for chunk in by_function[&function].chunks(self.config.batch_size) {
                batches.push(chunk.to_vec());
            }
        }
        batches
    }

    pub(crate) async fn function_body(&self, function_name: &str) -> Result<Option<String>> {
        Ok(self
            .context_builder
            .code_index()
            .await?
            .as_ref()
            .and_then(|index| index.function_definition(function_name)))
    }

    /// Relevant body lines per requirement of a function, computed once.
    pub(crate) async fn relevant_lines_for_function(
        &self,
        function_name: &str,
    ) -> Result<RelevantLines> {
        let cell = {
            let mut cells = self.relevance.lock().await;
            Arc::clone(cells.entry(function_name.to_string()).or_default())
        };
        cell.get_or_try_init(|| async {
            let Some(body) = self.function_body(function_name).await? else {
                return Ok(HashMap::new());
            };
            let function_requirements = self.requirements.for_function(function_name);
            let descriptions: Vec<String> = function_requirements
                .iter()
                .map(|r| r.description.clone())
                .collect();
            let groups =
                relevant_statement_groups(self.client.as_ref(), &body, &descriptions).await?;

            let mut map = HashMap::new();
            for (requirement, groups) in function_requirements.iter().zip(groups) {
                let mut lines: Vec<usize> = groups
                    .iter()
                    .flat_map(|g| g.line_numbers.iter().copied())
                    .collect();
                lines.sort_unstable();
                lines.dedup();
                map.insert(requirement.key.clone(), lines);
            }
            Ok(map)
        })
        .await
        .cloned()
    }

    /// Focus lines for a set of requirements, or `None` when the function
    /// is short enough to show whole.
    pub(crate) async fn focus_lines(
        &self,
        function_name: &str,
        keys: &[&str],
    ) -> Result<Option<Vec<usize>>> {
        let Some(body) = self.function_body(function_name).await? else {
            return Ok(None);
        };
        if body.lines().count() < self.config.min_prune_lines {
            return Ok(None);
        }
        let map = self.relevant_lines_for_function(function_name).await?;
        let mut lines: Vec<usize> = keys
            .iter()
            .filter_map(|key| map.get(*key))
            .flatten()
            .copied()
            .collect();
        lines.sort_unstable();
        lines.dedup();
        Ok(Some(lines))
    }

    /// The identifier alphabet for a function, restricted to the focus
    /// lines when given.
    pub(crate) async fn alphabet_for(
        &self,
        function_name: &str,
        focus_lines: Option<&[usize]>,
    ) -> Result<AlphabetSet> {
        let (global, used_atg_fallback) = self.harness.allowed_identifiers().await?;
        let body = match self.function_body(function_name).await? {
            Some(body) => body,
            // Relevance matching needs some text to search; fall back to
            // the reduced translation unit.
            None => self.harness.tu_content(ReductionLevel::High).await?,
        };
        let pruned = match focus_lines {
            Some(lines) if !lines.is_empty() => prune_code(&body, lines).ok(),
            _ => None,
        };
        Ok(alphabet::extract_set(
            &global,
            &body,
            pruned.as_deref(),
            self.config.max_array_index,
            used_atg_fallback,
        ))
    }

    pub(crate) fn record_schema_flags(&self, keys: &[&str], schema: &BuiltSchema) {
        for key in keys {
            self.info
                .set_schema_exceeded_size(key, schema.info.too_many_identifiers);
            self.info
                .set_found_no_allowed_identifiers(key, schema.info.no_identifiers_found);
            self.info
                .set_used_atg_identifier_fallback(key, schema.info.used_atg_identifiers);
        }
    }

    pub(crate) async fn derive_schema(
        &self,
        function_name: &str,
        focus_lines: Option<&[usize]>,
        batch_size: Option<usize>,
    ) -> Result<BuiltSchema> {
        let alphabet = self.alphabet_for(function_name, focus_lines).await?;
        Ok(SchemaBuilder::new(alphabet).derive_completion_schema(batch_size))
    }

    /// Example-test prompt block, or empty when examples are disabled or
    /// the prompt is already focused on pruned lines.
    pub(crate) async fn examples_section(
        &self,
        function_name: &str,
        keys: &[&str],
        context: &str,
        focused: bool,
        basis_path: bool,
    ) -> Result<String> {
        let k = if context.trim().lines().count() < 200 { 1 } else { 3 };
        let examples = self
            .example_selector
            .relevant_test_cases(function_name, k, basis_path)
            .await?;
        let no_examples = examples == "[]";
        for key in keys {
            self.info.set_no_atg_examples(key, no_examples);
        }
        if no_examples || !self.config.use_test_examples || focused {
            return Ok(String::new());
        }
        Ok(format!(
            "\nExample Test Cases:\n```json\n{examples}\n```\n"
        ))
    }

    /// Identifier listing for focused prompts. Test globals stay hidden,
    /// they rarely matter and inflate the prompt.
    pub(crate) fn identifier_section(schema: &BuiltSchema, focused: bool) -> String {
        let shown = |identifiers: &[String]| -> Vec<String> {
            identifiers
                .iter()
                .filter(|i| !i.contains(alphabet::GLOBALS_UNIT))
                .map(|i| format!("- {i}"))
                .collect()
        };
        let inputs = shown(&schema.info.input_identifiers);
        let expecteds = shown(&schema.info.expected_identifiers);
        if inputs.is_empty() || !focused {
            return String::new();
        }
        format!(
            "\nYou must set an input value for each of the following identifiers:\n{}\n\n\
             An expected value is not required for all identifiers. These are the ones you \
             can set:\n{}\n",
            inputs.join("\n"),
            expecteds.join("\n"),
        )
    }

    pub(crate) fn requirement(&self, key: &str) -> Option<&Requirement> {
        let requirement = self.requirements.get(key);
        if requirement.is_none() {
            warn!("requirement {key} not found");
        }
        requirement
    }
}

/// Shape of one generated test case in a structured response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelValueMapping {
    pub identifier: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelTestCase {
    pub requirement_id: String,
    pub test_name: String,
    pub test_description: String,
    pub unit_name: String,
    pub subprogram_name: String,
    pub input_values: Vec<ModelValueMapping>,
    pub expected_values: Vec<ModelValueMapping>,
}

impl ModelTestCase {
    pub(crate) fn into_test_case(self) -> TestCase {
        let convert = |values: Vec<ModelValueMapping>| -> Vec<ValueMapping> {
            values
                .into_iter()
                .map(|m| ValueMapping::new(m.identifier, m.value))
                .collect()
        };
        TestCase {
            test_name: self.test_name,
            test_description: self.test_description,
            requirement_id: Some(self.requirement_id),
            unit_name: self.unit_name,
            subprogram_name: self.subprogram_name,
            input_values: convert(self.input_values),
            expected_values: convert(self.expected_values),
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn model_test_case_conversion_normalizes_identifiers() {
        let model = ModelTestCase {
            requirement_id: "REQ-1".to_string(),
            test_name: "upper".to_string(),
            test_description: "desc".to_string(),
            unit_name: "sensor".to_string(),
            subprogram_name: "clamp_value".to_string(),
            input_values: vec![ModelValueMapping {
                identifier: "sensor.clamp_value.cfg->limit".to_string(),
                value: "5".to_string(),
            }],
            expected_values: Vec::new(),
        };
        let test = model.into_test_case();
        assert_eq!(test.requirement_id.as_deref(), Some("REQ-1"));
        assert_eq!(
            test.input_values[0],
            ValueMapping::new("sensor.clamp_value.*cfg[0].limit", "5")
        );
    }
}
