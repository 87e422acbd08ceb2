//! Batched generation: one LLM call covering all requirements of a
//! function, with per-slot degradation to the single path.

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::generate::{
    GenerateOptions, ModelTestCase, TestGenerator, GENERATION_SYSTEM_PROMPT,
    TEST_FRAMEWORK_REFERENCE,
};
use crate::llm::{ChatMessage, StructuredRequest};
use crate::testcase::TestCase;

const BATCHED_MAX_TOKENS: u32 = 8192;
const BATCHED_TEMPERATURE: f64 = 0.7;

impl TestGenerator {
    /// Generate tests for one batch of requirements sharing a function.
    /// Slots that error out or fail execution are regenerated through the
    /// single path; so are requirements the model did not cover.
    pub(crate) async fn generate_batch(
        &self,
        keys: &[String],
        options: &GenerateOptions,
    ) -> Vec<TestCase> {
        info!("generating batched test cases: {keys:?}");
        if keys.is_empty() {
            return Vec::new();
        }
        for key in keys {
            self.info.start_requirement(key);
        }

        let slots = match self.call_batched(keys, options).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!("batched model call failed, falling back to individual generation: {e}");
                for key in keys {
                    self.info.add_exception(key, e.to_string());
                }
                return self.degrade_all(keys, options).await;
            }
        };

        let mut unseen: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut tests = Vec::new();
        for (slot, value) in slots {
            match serde_json::from_value::<ModelTestCase>(value) {
                Ok(model) => {
                    let test = model.into_test_case();
                    let echoed = test.requirement_id.as_deref().unwrap_or_default();
                    if let Some(position) = unseen.iter().position(|key| *key == echoed) {
                        unseen.remove(position);
                    } else {
                        warn!(
                            "requirement {echoed} was generated multiple times or was not requested"
                        );
                    }
                    tests.push(test);
                }
                Err(e) => {
                    warn!("batched slot {slot} is malformed: {e}");
                }
            }
        }

        let processed = join_all(
            tests
                .into_iter()
                .map(|test| self.process_batched_test(test, options)),
        )
        .await;
        let mut results: Vec<TestCase> = processed.into_iter().flatten().collect();

        if !unseen.is_empty() {
            info!("requeueing uncovered requirements: {unseen:?}");
            let regenerated = join_all(unseen.iter().map(|key| {
                self.info.set_individual_test_generation_needed(key);
                self.generate_test_case(key, options, true)
            }))
            .await;
            results.extend(regenerated.into_iter().flatten());
        }
        results
    }

    /// Run one batched slot. Compile errors, and failures when batch
    /// partials are off, push the requirement down to the single path.
    async fn process_batched_test(
        &self,
        test: TestCase,
        options: &GenerateOptions,
    ) -> Option<TestCase> {
        let key = test.requirement_id.clone().unwrap_or_default();
        let diagnostics = match self.run_and_diagnose(&test).await {
            Ok(diagnostics) => diagnostics,
            Err(e) => {
                warn!("failed to execute batched test for {key}: {e}");
                self.info.add_exception(&key, e.to_string());
                self.info.set_individual_test_generation_needed(&key);
                return self.generate_test_case(&key, options, true).await;
            }
        };

        let failed = diagnostics.errors.is_some()
            || (!options.allow_batch_partial && diagnostics.test_failures.is_some());
        if failed {
            self.info.set_individual_test_generation_needed(&key);
            return self.generate_test_case(&key, options, true).await;
        }

        self.info.set_test_generated(&key);
        if diagnostics.test_failures.is_some() {
            self.info.set_partial_test_generated(&key);
            return Some(test.as_partial());
        }
        Some(test)
    }

    async fn degrade_all(&self, keys: &[String], options: &GenerateOptions) -> Vec<TestCase> {
        let regenerated = join_all(
            keys.iter()
                .map(|key| self.generate_test_case(key, options, true)),
        )
        .await;
        regenerated.into_iter().flatten().collect()
    }

    /// One structured call; returns the slot key and raw value per
    /// requested requirement, in slot order.
    async fn call_batched(
        &self,
        keys: &[String],
        _options: &GenerateOptions,
    ) -> Result<Vec<(String, Value)>> {
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let function_name = self
            .requirement(&keys[0])
            .map(|r| r.location.function.clone())
            .unwrap_or_default();

        let focus_lines = self.focus_lines(&function_name, &key_refs).await?;
        let focused = focus_lines.is_some();

        let (context, used_fallback) = self
            .context_builder
            .build_code_context(&function_name, focus_lines.as_deref(), true)
            .await?;
        for key in keys {
            self.info.set_used_code_context_fallback(key, used_fallback);
        }

        let examples_section = self
            .examples_section(&function_name, &key_refs, &context, focused, true)
            .await?;

        let schema = self
            .derive_schema(&function_name, focus_lines.as_deref(), Some(keys.len()))
            .await?;
        self.record_schema_flags(&key_refs, &schema);
        let identifier_section = Self::identifier_section(&schema, focused);

        let requirements_text: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let description = self
                    .requirements
                    .get(key)
                    .map(|r| r.description.as_str())
                    .unwrap_or_default();
                format!("{}. {key}: {description}", i + 1)
            })
            .collect();

        let prompt = format!(
            "Based on the following requirements, references, and code, generate one test \
             case per given requirement that exercises it.\n\n\
             Test framework reference:\n{TEST_FRAMEWORK_REFERENCE}\n\n\
             Relevant Code:\n```cpp\n{context}\n```\n\
             {examples_section}\n\
             Requirements:\n{}\n\n\
             Detailed task description:\n\
             Based on the above requirements and code, generate unit tests that exercise all \
             requirements.\n\
             Make sure the generated test cases clearly test the provided requirements.\n\n\
             Solve the problem using the following approach:\n\
             For each requirement in order...\n\
             \x20   1. Come up with descriptive (unique) name for the test case and describe \
             in natural language how this test exercises the requirement\n\
             \x20   2. Provide the name of the unit being tested (base file name without \
             extension) and the name of the subprogram being tested (function name)\n\
             \x20   3. Provide the input and expected values by providing the correct \
             identifier and value in the syntax outlined above.\n\
             {identifier_section}\n\
             Notes:\n\
             - You are NOT allowed to invent any syntax that is not specified in the syntax \
             reference. Stick to the syntax provided.\n\
             - You are NOT allowed to invent any units or functions that are not present in \
             the provided code.\n\
             - This is a highly critical task, please ensure that the test cases are correct \
             and complete and do not contain any logical or syntactical errors.\n\
             - Test cases are independent of each other, i.e., they should not rely on one \
             being run before the other (or environment being modified by one).\n\
             - Generate exactly one test case per requirement.\n\
             - In case the requirement and the code differ, the requirement is what you \
             should test, i.e., it is the source of truth.\n",
            requirements_text.join("\n"),
        );

        let request = StructuredRequest::new(
            vec![
                ChatMessage::system(GENERATION_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            schema.name.clone(),
            schema.schema.clone(),
        )
        .with_temperature(BATCHED_TEMPERATURE)
        .with_extended_reasoning(self.config.use_extended_reasoning)
        .with_max_tokens(BATCHED_MAX_TOKENS);

        let response = self.client.call_structured(request).await?;
        let slots = (1..=keys.len())
            .map(|i| {
                let slot = format!("test_case_for_requirement_{i}");
                let value = response.value[slot.as_str()].clone();
                (slot, value)
            })
            .collect();
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::generate::{GenerateOptions, GeneratorConfig, TestGenerator};
    use crate::harness::{Harness, ReductionLevel};
    use crate::llm::{LlmClient, StructuredRequest, StructuredResponse, TokenUsage};
    use crate::requirements::{Location, Requirement, RequirementsCollection};
    use crate::testcase::TestCase;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const TU: &str = "\
int clamp_value(int raw) {
    if (raw > 100) {
        return 100;
    }
    return raw;
}
";

    struct FakeHarness {
        // One parsed outcome per run, popped front. Runs after exhaustion
        // come back clean.
        run_outputs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Harness for FakeHarness {
        fn env_name(&self) -> &str {
            "CLAMP"
        }
        async fn units(&self) -> crate::error::Result<Vec<String>> {
            Ok(vec!["sensor".to_string()])
        }
        async fn allowed_identifiers(&self) -> crate::error::Result<(Vec<String>, bool)> {
            Ok((
                vec![
                    "sensor.clamp_value.raw".to_string(),
                    "sensor.clamp_value.return".to_string(),
                ],
                false,
            ))
        }
        async fn run_tests(&self, _scripts: &[String]) -> crate::error::Result<String> {
            let mut outputs = self.run_outputs.lock().unwrap();
            Ok(if outputs.is_empty() {
                String::new()
            } else {
                outputs.remove(0)
            })
        }
        async fn tu_content(&self, _level: ReductionLevel) -> crate::error::Result<String> {
            Ok(TU.to_string())
        }
        async fn atg_tests(&self) -> crate::error::Result<Vec<TestCase>> {
            Ok(Vec::new())
        }
        async fn basis_path_tests(&self) -> crate::error::Result<Vec<TestCase>> {
            Ok(Vec::new())
        }
    }

    struct ScriptedClient {
        responses: Vec<crate::error::Result<Value>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn call_structured(
            &self,
            _request: StructuredRequest,
        ) -> crate::error::Result<StructuredResponse> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let index = index.min(self.responses.len() - 1);
            match &self.responses[index] {
                Ok(value) => Ok(StructuredResponse::new(
                    value.clone(),
                    TokenUsage::default(),
                    "mock",
                )),
                Err(_) => Err(Error::Llm("scripted failure".to_string())),
            }
        }
    }

    fn slot(requirement: &str, name: &str) -> Value {
        json!({
            "requirement_id": requirement,
            "test_name": name,
            "test_description": "d",
            "unit_name": "sensor",
            "subprogram_name": "clamp_value",
            "input_values": [{"identifier": "sensor.clamp_value.raw", "value": "1"}],
            "expected_values": [{"identifier": "sensor.clamp_value.return", "value": "1"}],
        })
    }

    fn requirements() -> RequirementsCollection {
        let mut collection = RequirementsCollection::default();
        for key in ["REQ-1", "REQ-2"] {
            collection
                .push(Requirement {
                    key: key.to_string(),
                    id: key.to_string(),
                    title: key.to_string(),
                    description: format!("{key} description"),
                    location: Location::new("sensor", "clamp_value"),
                    original_key: None,
                })
                .unwrap();
        }
        collection
    }

    fn generator(harness: FakeHarness, client: ScriptedClient) -> TestGenerator {
        TestGenerator::new(
            Arc::new(harness),
            Arc::new(client),
            requirements(),
            GeneratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn clean_batch_returns_all_slots() {
        let generator = generator(
            FakeHarness {
                run_outputs: Mutex::new(Vec::new()),
            },
            ScriptedClient {
                responses: vec![Ok(json!({
                    "test_case_for_requirement_1": slot("REQ-1", "t1"),
                    "test_case_for_requirement_2": slot("REQ-2", "t2"),
                }))],
                calls: AtomicUsize::new(0),
            },
        );
        let keys = vec!["REQ-1".to_string(), "REQ-2".to_string()];
        let mut tests = generator
            .generate_test_cases(&keys, &GenerateOptions::default())
            .await;
        tests.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].test_name, "t1");
        assert_eq!(tests[1].test_name, "t2");
        let record = generator.info().get("REQ-1").unwrap();
        assert!(record.test_generated);
        assert!(!record.individual_test_generation_needed);
    }

    #[tokio::test]
    async fn failing_slot_degrades_to_single_path() {
        let failure = "Expected results matched 50 percent [  FAIL  ]\n";
        // First run (slot REQ-2) fails; all later runs are clean.
        let generator = generator(
            FakeHarness {
                run_outputs: Mutex::new(vec![String::new(), failure.to_string()]),
            },
            ScriptedClient {
                responses: vec![
                    Ok(json!({
                        "test_case_for_requirement_1": slot("REQ-1", "t1"),
                        "test_case_for_requirement_2": slot("REQ-2", "t2"),
                    })),
                    Ok(json!({"test_case": slot("REQ-2", "t2_single")})),
                ],
                calls: AtomicUsize::new(0),
            },
        );
        let keys = vec!["REQ-1".to_string(), "REQ-2".to_string()];
        let mut tests = generator
            .generate_test_cases(&keys, &GenerateOptions::default())
            .await;
        tests.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        let names: Vec<&str> = tests.iter().map(|t| t.test_name.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2_single"]);
        let record = generator.info().get("REQ-2").unwrap();
        assert!(record.individual_test_generation_needed);
    }

    #[tokio::test]
    async fn model_failure_degrades_whole_batch() {
        let generator = generator(
            FakeHarness {
                run_outputs: Mutex::new(Vec::new()),
            },
            ScriptedClient {
                responses: vec![
                    Err(Error::Llm("boom".to_string())),
                    Ok(json!({"test_case": slot("REQ-1", "s1")})),
                    Ok(json!({"test_case": slot("REQ-2", "s2")})),
                ],
                calls: AtomicUsize::new(0),
            },
        );
        let keys = vec!["REQ-1".to_string(), "REQ-2".to_string()];
        let mut tests = generator
            .generate_test_cases(&keys, &GenerateOptions::default())
            .await;
        tests.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        assert_eq!(tests.len(), 2);
        let record = generator.info().get("REQ-1").unwrap();
        assert!(!record.exceptions.is_empty());
        assert!(record.individual_test_generation_needed);
    }

    #[tokio::test]
    async fn uncovered_requirement_is_requeued() {
        // The model answers both slots with REQ-1; REQ-2 goes unseen and
        // is regenerated individually.
        let generator = generator(
            FakeHarness {
                run_outputs: Mutex::new(Vec::new()),
            },
            ScriptedClient {
                responses: vec![
                    Ok(json!({
                        "test_case_for_requirement_1": slot("REQ-1", "t1"),
                        "test_case_for_requirement_2": slot("REQ-1", "t1_again"),
                    })),
                    Ok(json!({"test_case": slot("REQ-2", "t2_single")})),
                ],
                calls: AtomicUsize::new(0),
            },
        );
        let keys = vec!["REQ-1".to_string(), "REQ-2".to_string()];
        let tests = generator
            .generate_test_cases(&keys, &GenerateOptions::default())
            .await;
        let names: Vec<&str> = tests.iter().map(|t| t.test_name.as_str()).collect();
        assert!(names.contains(&"t2_single"));
        assert_eq!(tests.len(), 3);
    }

    #[tokio::test]
    async fn batch_partial_keeps_failing_slot_as_partial() {
        let failure = "Expected results matched 50 percent [  FAIL  ]\n";
        let generator = generator(
            FakeHarness {
                run_outputs: Mutex::new(vec![failure.to_string(), failure.to_string()]),
            },
            ScriptedClient {
                responses: vec![Ok(json!({
                    "test_case_for_requirement_1": slot("REQ-1", "t1"),
                    "test_case_for_requirement_2": slot("REQ-2", "t2"),
                }))],
                calls: AtomicUsize::new(0),
            },
        );
        let keys = vec!["REQ-1".to_string(), "REQ-2".to_string()];
        let options = GenerateOptions {
            allow_batch_partial: true,
            ..Default::default()
        };
        let tests = generator.generate_test_cases(&keys, &options).await;
        assert_eq!(tests.len(), 2);
        assert!(tests.iter().all(|t| t.test_name.ends_with("-PARTIAL")));
        assert!(tests.iter().all(|t| t.expected_values.is_empty()));
    }
}
