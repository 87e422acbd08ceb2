//! LLM review of generated tests against their requirements.
//!
//! Independent of generation: the verifier never touches the tests, it
//! only grades whether a test plausibly exercises its requirement.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::warn;

use crate::context::ContextBuilder;
use crate::error::Result;
use crate::generate::TEST_FRAMEWORK_REFERENCE;
use crate::harness::Harness;
use crate::llm::{ChatMessage, LlmClient, StructuredRequest};
use crate::requirements::RequirementsCollection;
use crate::testcase::TestCase;

/// One verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub requirement_id: String,
    pub analysis: String,
    pub tests_requirement: bool,
}

/// Grades test cases against their requirements.
pub struct TestVerifier {
    client: Arc<dyn LlmClient>,
    requirements: RequirementsCollection,
    context_builder: ContextBuilder,
}

impl TestVerifier {
    pub fn new(
        harness: Arc<dyn Harness>,
        client: Arc<dyn LlmClient>,
        requirements: RequirementsCollection,
    ) -> Self {
        Self {
            client,
            requirements,
            context_builder: ContextBuilder::new(harness),
        }
    }

    /// Verify one test case. Failures of any kind grade as "does not test
    /// the requirement" with the failure as analysis; verification must
    /// never block the pipeline.
    pub async fn verify_test_case(&self, key: &str, test: &TestCase) -> VerificationResult {
        match self.grade(key, test).await {
            Ok(result) => result,
            Err(e) => {
                warn!("failed to verify test case for {key}: {e}");
                VerificationResult {
                    requirement_id: key.to_string(),
                    analysis: format!("Verification failed due to error: {e}"),
                    tests_requirement: false,
                }
            }
        }
    }

    /// Verify many test cases in parallel, preserving input order.
    pub async fn verify_test_cases(
        &self,
        tasks: &[(String, TestCase)],
    ) -> Vec<VerificationResult> {
        join_all(
            tasks
                .iter()
                .map(|(key, test)| self.verify_test_case(key, test)),
        )
        .await
    }

    async fn grade(&self, key: &str, test: &TestCase) -> Result<VerificationResult> {
        let Some(requirement) = self.requirements.get(key) else {
            return Ok(VerificationResult {
                requirement_id: key.to_string(),
                analysis: "Requirement not found in database".to_string(),
                tests_requirement: false,
            });
        };

        let (context, _) = self
            .context_builder
            .build_code_context(&requirement.location.function, None, false)
            .await?;

        let prompt = format!(
            "Please analyze if the following test case properly tests the given \
             requirement.\n\n\
             Test framework reference:\n{TEST_FRAMEWORK_REFERENCE}\n\n\
             Relevant Code:\n{context}\n\n\
             Requirement ID: {key}\n\
             Requirement Text: {}\n\n\
             Test Case:\n{}\n\n\
             Please analyze:\n\
             - Does the test case properly test the requirement?\n\
             - Are all aspects of the requirement covered?\n\
             - Are the test inputs appropriate for testing the requirement?\n\
             - Are the expected outputs correctly validating the requirement?\n",
            requirement.description,
            serde_json::to_string_pretty(test)?,
        );
        let request = StructuredRequest::new(
            vec![
                ChatMessage::system(
                    "You are an AI assistant that verifies if test cases properly test \
                     their associated requirements.",
                ),
                ChatMessage::user(prompt),
            ],
            "test_verification",
            json!({
                "type": "object",
                "properties": {
                    "analysis": {"type": "string"},
                    "tests_requirement": {"type": "string", "enum": ["yes", "no"]},
                },
                "required": ["analysis", "tests_requirement"],
                "additionalProperties": false,
            }),
        );
        let response = self.client.call_structured(request).await?;

        let tests_requirement = match &response.value["tests_requirement"] {
            serde_json::Value::Bool(value) => *value,
            serde_json::Value::String(value) => value.eq_ignore_ascii_case("yes"),
            _ => false,
        };
        Ok(VerificationResult {
            requirement_id: key.to_string(),
            analysis: response.value["analysis"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            tests_requirement,
        })
    }
}
