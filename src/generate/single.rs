//! Single-requirement generation with an iterative fix loop.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::generate::{
    GenerateOptions, ModelTestCase, TestGenerator, GENERATION_SYSTEM_PROMPT,
    TEST_FRAMEWORK_REFERENCE,
};
use crate::harness::Diagnostics;
use crate::llm::{ChatMessage, StructuredRequest};
use crate::schema::BuiltSchema;
use crate::testcase::TestCase;

const SINGLE_MAX_TOKENS: u32 = 4096;

impl TestGenerator {
    /// Generate one test case for a requirement. Retries restart from
    /// scratch with a higher temperature, extended reasoning, and a
    /// reworded requirement. `None` means the requirement was abandoned.
    pub async fn generate_test_case(
        &self,
        key: &str,
        options: &GenerateOptions,
        already_started: bool,
    ) -> Option<TestCase> {
        if !already_started {
            self.info.start_requirement(key);
        }
        self.info.set_individual_test_generation_needed(key);

        for attempt in 0..options.max_retries.max(1) {
            self.info.increment_retries_used(key);
            let first_try = attempt == 0;
            let temperature = if first_try { 0.0 } else { 1.0 };
            let extended_reasoning = !first_try || self.config.use_extended_reasoning;
            match self
                .attempt(key, temperature, extended_reasoning, options.allow_partial, !first_try)
                .await
            {
                Ok(Some(test)) => {
                    self.info.set_test_generated(key);
                    return Some(test);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("test generation attempt failed for {key}: {e}");
                    self.info.add_exception(key, e.to_string());
                }
            }
        }
        None
    }

    async fn attempt(
        &self,
        key: &str,
        temperature: f64,
        extended_reasoning: bool,
        allow_partial: bool,
        reword_requirement: bool,
    ) -> Result<Option<TestCase>> {
        let Some(requirement) = self.requirement(key) else {
            return Ok(None);
        };
        let function_name = requirement.location.function.clone();
        if function_name.is_empty() {
            warn!("requirement {key} has no function, skipping");
            return Ok(None);
        }

        let mut requirement_text = requirement.description.clone();
        if reword_requirement {
            info!("original requirement ({key}): {requirement_text}");
            requirement_text = self
                .reword(&requirement_text, temperature, extended_reasoning)
                .await?;
            info!("reworded requirement ({key}): {requirement_text}");
        }

        let focus_lines = self.focus_lines(&function_name, &[key]).await?;
        let focused = focus_lines.is_some();

        let schema = self
            .derive_schema(&function_name, focus_lines.as_deref(), None)
            .await?;
        self.record_schema_flags(&[key], &schema);
        let identifier_section = Self::identifier_section(&schema, focused);

        let (context, used_fallback) = self
            .context_builder
            .build_code_context(&function_name, focus_lines.as_deref(), true)
            .await?;
        self.info.set_used_code_context_fallback(key, used_fallback);

        let examples_section = self
            .examples_section(&function_name, &[key], &context, focused, false)
            .await?;

        let prompt = format!(
            "Based on the following requirement, references, code and example test cases, \
             generate unit tests that exercise the requirement.\n\n\
             Test framework reference:\n{TEST_FRAMEWORK_REFERENCE}\n\n\
             Relevant Code:\n```cpp\n{context}\n```\n\
             {examples_section}\n\
             Requirement ID: {key}\n\
             Requirement Text: {requirement_text}\n\n\
             Detailed task description:\n\
             Based on the above requirement and code, generate a unit test that exercises the \
             requirement.\n\
             Make sure the generated test case clearly tests the provided requirement.\n\n\
             Solve the problem using the following steps:\n\
             1. Give a description in natural language of how the requirement should be tested.\n\
             2. Think about which values need to be set to what and what we expect to happen \
             in the actual code, i.e., how do we translate from natural language description \
             to implementation?\n\
             3. Generate a test case in the syntax provided above.\n\
             \x20   a. Come up with a descriptive (unique) name for the test case and describe \
             in natural language how this test exercises the requirement\n\
             \x20   b. Provide the name of the unit being tested (base file name without \
             extension) and the name of the subprogram being tested (function name)\n\
             \x20   c. Provide the input and expected values by providing the correct \
             identifier and value in the syntax outlined above.\n\
             {identifier_section}\n\
             Notes:\n\
             - You are NOT allowed to invent any syntax that is not specified in the syntax \
             reference. Stick to the syntax provided.\n\
             - You are NOT allowed to invent any units or functions that are not present in \
             the provided code.\n\
             - This is a highly critical task, please ensure that the test case is correct \
             and complete and does not contain any logical or syntactical errors.\n\
             - Test cases are independent of each other, i.e., they should not rely on one \
             being run before the other (or environment being modified by one).\n\
             - For each test case, make sure to set an input value for all arguments, global \
             variables and stubs used in the function.\n\
             - For each test case, make sure to only set expected values precisely for what \
             the requirement specifies. Nothing more, nothing less.\n\
             - In case the requirement and the code differ, the requirement is what you \
             should test, i.e., it is the source of truth.\n\
             - Watch out for off-by-one errors\n",
        );

        let mut messages = vec![
            ChatMessage::system(GENERATION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let mut result = self
            .call_generation(&messages, &schema, temperature, extended_reasoning)
            .await?;

        for iteration in 0..self.config.max_iterations {
            let test = match self.parse_result(key, &result) {
                Some(test) => test,
                None => return Ok(None),
            };
            let diagnostics = self.run_and_diagnose(&test).await?;
            if diagnostics.is_clean() {
                return Ok(Some(test));
            }
            if diagnostics.errors.is_none() && allow_partial {
                info!("converting {key} to a partial test case after run failures");
                self.info.set_partial_test_generated(key);
                return Ok(Some(test.as_partial()));
            }

            self.info.set_error_correction_needed(key);
            if diagnostics.test_failures.is_some() {
                self.info.set_test_run_failure_feedback(key);
            }
            if iteration + 1 == self.config.max_iterations {
                break;
            }
            info!("errors detected in test case for {key}, fix iteration {}", iteration + 1);
            messages.push(ChatMessage::assistant(result.to_string()));
            messages.push(ChatMessage::user(fix_prompt(&diagnostics)));
            result = self
                .call_generation(&messages, &schema, temperature, extended_reasoning)
                .await?;
        }

        warn!("failed to fix test case for {key} within the iteration limit");
        Ok(None)
    }

    async fn reword(
        &self,
        requirement_text: &str,
        temperature: f64,
        extended_reasoning: bool,
    ) -> Result<String> {
        let request = StructuredRequest::new(
            vec![
                ChatMessage::system("You are an AI assistant that rewords requirements."),
                ChatMessage::user(format!("Reword the following requirement: {requirement_text}")),
            ],
            "reworded_requirement",
            json!({
                "type": "object",
                "properties": {"reworded_requirement": {"type": "string"}},
                "required": ["reworded_requirement"],
                "additionalProperties": false,
            }),
        )
        .with_temperature(temperature)
        .with_extended_reasoning(extended_reasoning);
        let response = self.client.call_structured(request).await?;
        Ok(response.value["reworded_requirement"]
            .as_str()
            .unwrap_or(requirement_text)
            .to_string())
    }

    async fn call_generation(
        &self,
        messages: &[ChatMessage],
        schema: &BuiltSchema,
        temperature: f64,
        extended_reasoning: bool,
    ) -> Result<Value> {
        let request = StructuredRequest::new(
            messages.to_vec(),
            schema.name.clone(),
            schema.schema.clone(),
        )
        .with_temperature(temperature)
        .with_extended_reasoning(extended_reasoning)
        .with_max_tokens(SINGLE_MAX_TOKENS);
        Ok(self.client.call_structured(request).await?.value)
    }

    fn parse_result(&self, key: &str, result: &Value) -> Option<TestCase> {
        match serde_json::from_value::<ModelTestCase>(result["test_case"].clone()) {
            Ok(model) => {
                let mut test = model.into_test_case();
                // The requirement under generation wins over the model echo.
                test.requirement_id = Some(key.to_string());
                Some(test)
            }
            Err(e) => {
                warn!("malformed test case for {key}: {e}");
                self.info.add_exception(key, e.to_string());
                None
            }
        }
    }

    pub(crate) async fn run_and_diagnose(&self, test: &TestCase) -> Result<Diagnostics> {
        let output = self.harness.run_tests(&[test.to_script(true)]).await?;
        Ok(Diagnostics::parse(&output))
    }
}

fn fix_prompt(diagnostics: &Diagnostics) -> String {
    let extract = diagnostics
        .errors
        .as_deref()
        .or(diagnostics.test_failures.as_deref())
        .unwrap_or_default();
    format!(
        "There were errors when executing the test case:\n\n\
         Error Output:\n```\n{extract}\n```\n\n\
         Please fix the test case accordingly, ensuring that the identifiers match exactly \
         the syntax described in the reference.\n\n\
         Remember:\n\
         - Do not change the units or functions being tested.\n\
         - Use the syntax reference provided.\n\
         - Ensure that the test case is correct and complete and does not contain any \
         logical or syntactical errors.\n\n\
         Tip:\n\
         - If you see something like this in the errors: error: expected expression before \
         '<<' token, then that likely means you are setting a macro in a reference which is \
         not allowed.\n\
         - If you see something like this in the errors: [  FAIL  ], then that means the \
         test case failed to pass. Likely because you misunderstood the requirement, the \
         code or the testing framework.\n\
         - If you get different expected outputs than what you expect, carefully analyze:\n\
         \x20   - If this is due to a discrepancy in the requirement and the code, the \
         requirement is the source of truth, so you can leave the test case as is.\n\
         \x20   - If it appears that the test framework is working differently than you \
         expected, try to find an indirect way to test the requirement partially, i.e., \
         just a correct return value instead of complex pointer logic\n",
    )
}
