//! # reqs2tests-core
//!
//! LLM-driven generation of unit test cases from natural-language requirements
//! for safety-critical C/C++ code under a VectorCAST-style test harness.
//!
//! ## Core Components
//!
//! - **Requirements**: Requirement data model plus CSV and gateway adapters
//! - **Harness**: VectorCAST environment driver, script emission, diagnostics
//! - **Analysis**: tree-sitter based pruning and statement-group extraction
//! - **Generate**: single and batched test generation with error correction
//! - **Verify**: LLM verification of generated tests against requirements
//!
//! ## Example
//!
//! ```rust,ignore
//! use reqs2tests_core::{GenerateOptions, TestGenerator};
//!
//! let generator = TestGenerator::new(harness, llm, requirements, Default::default());
//! let tests = generator
//!     .generate_test_cases(&keys, &GenerateOptions::default())
//!     .await;
//! for test in tests {
//!     println!("{}", test.to_script(false));
//! }
//! ```

pub mod alphabet;
pub mod analysis;
pub mod context;
pub mod decompose;
pub mod error;
pub mod examples;
pub mod generate;
pub mod harness;
pub mod llm;
pub mod requirements;
pub mod schema;
pub mod testcase;
pub mod verify;

// Re-exports for convenience
pub use alphabet::{Alphabet, AlphabetOptions, AlphabetSet, GLOBALS_UNIT, GLOBAL_SUBPROGRAM, STUB_UNIT};
pub use context::ContextBuilder;
pub use decompose::{decompose_requirements, DecomposerConfig};
pub use error::{Error, Result};
pub use examples::ExampleSelector;
pub use generate::{GenerateOptions, GeneratorConfig, InfoLog, InfoRecord, TestGenerator};
pub use harness::{Diagnostics, Harness, HarnessConfig, ReductionLevel, VectorCastEnv};
pub use llm::{
    CallTier, ChatMessage, ChatRole, ClientConfig, CostTracker, LlmClient, OpenAiCompatClient,
    RateLimiter, ReplayClient, RequestCache, RequestReplay, StructuredRequest, StructuredResponse,
    TokenUsage,
};
pub use requirements::{Location, Requirement, RequirementsCollection};
pub use schema::{BuiltSchema, IdentifierMode, SchemaBuilder, SchemaGenInfo};
pub use testcase::{TestCase, ValueMapping};
pub use verify::{TestVerifier, VerificationResult};
