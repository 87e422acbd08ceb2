//! Harness surface: environment driver, script emission/parsing, run
//! output diagnostics.

pub mod diagnostics;
pub mod driver;
pub mod script;

pub use diagnostics::Diagnostics;
pub use driver::{HarnessConfig, VectorCastEnv};
pub use script::{parse_test_script, script_header};

use async_trait::async_trait;

use crate::error::Result;
use crate::testcase::TestCase;

/// How much of the translation-unit dump to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionLevel {
    /// Everything, including built-in definitions.
    Low,
    /// Built-ins stripped, included headers kept.
    Medium,
    /// Only the unit's own source file content.
    High,
}

/// The capabilities the pipeline needs from a test environment.
///
/// [`VectorCastEnv`] is the production implementation; tests use mocks.
#[async_trait]
pub trait Harness: Send + Sync {
    fn env_name(&self) -> &str;

    /// Unit names under test (source file stems).
    async fn units(&self) -> Result<Vec<String>>;

    /// Global settable/checkable identifiers. The boolean is true when the
    /// list had to be scraped from auto-generated example tests instead of
    /// the script template.
    async fn allowed_identifiers(&self) -> Result<(Vec<String>, bool)>;

    /// Load the given test script blocks, execute each test, delete them
    /// again, and return the combined harness output.
    async fn run_tests(&self, scripts: &[String]) -> Result<String>;

    /// Post-preprocessor translation-unit content at the given reduction.
    async fn tu_content(&self, level: ReductionLevel) -> Result<String>;

    /// Auto-generated example tests. Empty on generator failure.
    async fn atg_tests(&self) -> Result<Vec<TestCase>>;

    /// Basis-path example tests. Empty on generator failure.
    async fn basis_path_tests(&self) -> Result<Vec<TestCase>>;
}
