//! Example test selection.
//!
//! Harness auto-generated tests double as in-context exemplars. For a
//! target function we pick a deterministic random sample of its tests,
//! preferring complete ones over partial or template stubs.

use std::sync::Arc;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use regex::Regex;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::harness::Harness;
use crate::testcase::TestCase;

const SAMPLE_SEED: u64 = 42;
const DEGRADED_MARKERS: [&str; 3] = ["PARTIAL", "INCOMPLETE", "TEMPLATE"];

/// Strip template arguments and overload signatures from a subprogram
/// name, e.g. `ns::max<int>(int, int)` becomes `ns::max`.
pub fn sanitize_subprogram_name(subprogram_name: &str) -> String {
    static TEMPLATE_ARGS: OnceLock<Regex> = OnceLock::new();
    let template_args =
        TEMPLATE_ARGS.get_or_init(|| Regex::new(r"<[^<>]*?>").expect("static regex"));

    let mut name = subprogram_name.to_string();
    loop {
        let stripped = template_args.replace_all(&name, "").into_owned();
        if stripped == name {
            break;
        }
        name = stripped;
    }
    match name.split_once('(') {
        Some((before, _)) => before.trim().to_string(),
        None => name.trim().to_string(),
    }
}

/// Picks example tests for target functions from the harness generators.
pub struct ExampleSelector {
    harness: Arc<dyn Harness>,
    atg: OnceCell<Vec<TestCase>>,
    basis: OnceCell<Vec<TestCase>>,
}

impl ExampleSelector {
    pub fn new(harness: Arc<dyn Harness>) -> Self {
        Self {
            harness,
            atg: OnceCell::new(),
            basis: OnceCell::new(),
        }
    }

    /// Up to `k` example tests for `function_name`, rendered as a pretty
    /// JSON array. Empty array when the generators produced nothing for
    /// this function.
    pub async fn relevant_test_cases(
        &self,
        function_name: &str,
        k: usize,
        basis_path: bool,
    ) -> Result<String> {
        let tests = if basis_path {
            self.basis
                .get_or_try_init(|| self.harness.basis_path_tests())
                .await?
        } else {
            self.atg
                .get_or_try_init(|| self.harness.atg_tests())
                .await?
        };

        let matching: Vec<&TestCase> = tests
            .iter()
            .filter(|test| sanitize_subprogram_name(&test.subprogram_name).starts_with(function_name))
            .collect();
        let (complete, degraded): (Vec<&TestCase>, Vec<&TestCase>) =
            matching.into_iter().partition(|test| {
                DEGRADED_MARKERS
                    .iter()
                    .all(|marker| !test.test_name.contains(marker))
            });

        let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
        let mut selected: Vec<&TestCase> = complete
            .choose_multiple(&mut rng, k.min(complete.len()))
            .copied()
            .collect();
        if selected.len() < k {
            selected.extend(
                degraded
                    .choose_multiple(&mut rng, (k - selected.len()).min(degraded.len()))
                    .copied(),
            );
        }

        Ok(serde_json::to_string_pretty(&selected)?)
    }

    /// True when the generator produced no tests at all for this function.
    pub async fn has_examples(&self, function_name: &str) -> Result<bool> {
        let tests = self
            .atg
            .get_or_try_init(|| self.harness.atg_tests())
            .await?;
        Ok(tests
            .iter()
            .any(|test| sanitize_subprogram_name(&test.subprogram_name).starts_with(function_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::harness::ReductionLevel;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitizes_templates_and_overloads() {
        assert_eq!(sanitize_subprogram_name("clamp_value"), "clamp_value");
        assert_eq!(sanitize_subprogram_name("ns::max<int>(int, int)"), "ns::max");
        // Nested template arguments need repeated stripping.
        assert_eq!(
            sanitize_subprogram_name("lookup<map<int, int>>(int)"),
            "lookup"
        );
    }

    fn test(name: &str, subprogram: &str) -> TestCase {
        TestCase {
            test_name: name.to_string(),
            test_description: String::new(),
            requirement_id: None,
            unit_name: "sensor".to_string(),
            subprogram_name: subprogram.to_string(),
            input_values: Vec::new(),
            expected_values: Vec::new(),
        }
    }

    struct FakeHarness {
        tests: Vec<TestCase>,
    }

    #[async_trait]
    impl Harness for FakeHarness {
        fn env_name(&self) -> &str {
            "FAKE"
        }
        async fn units(&self) -> Result<Vec<String>> {
            Ok(vec!["sensor".to_string()])
        }
        async fn allowed_identifiers(&self) -> Result<(Vec<String>, bool)> {
            Ok((Vec::new(), false))
        }
        async fn run_tests(&self, _scripts: &[String]) -> Result<String> {
            Err(Error::harness("not under test"))
        }
        async fn tu_content(&self, _level: ReductionLevel) -> Result<String> {
            Ok(String::new())
        }
        async fn atg_tests(&self) -> Result<Vec<TestCase>> {
            Ok(self.tests.clone())
        }
        async fn basis_path_tests(&self) -> Result<Vec<TestCase>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn prefers_complete_tests_and_tops_up_with_partial() {
        let harness = Arc::new(FakeHarness {
            tests: vec![
                test("full_one", "clamp_value"),
                test("full_two", "clamp_value"),
                test("stub-PARTIAL", "clamp_value"),
                test("other", "scale_value"),
            ],
        });
        let selector = ExampleSelector::new(harness);
        let rendered = selector
            .relevant_test_cases("clamp_value", 3, false)
            .await
            .unwrap();
        let selected: Vec<TestCase> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(selected.len(), 3);
        // Both complete tests come first, one degraded test tops up.
        let names: Vec<&str> = selected.iter().map(|t| t.test_name.as_str()).collect();
        assert!(names.contains(&"full_one"));
        assert!(names.contains(&"full_two"));
        assert!(names.contains(&"stub-PARTIAL"));
    }

    #[tokio::test]
    async fn selection_is_deterministic() {
        let tests: Vec<TestCase> = (0..10)
            .map(|i| test(&format!("t{i}"), "clamp_value"))
            .collect();
        let first = ExampleSelector::new(Arc::new(FakeHarness { tests: tests.clone() }))
            .relevant_test_cases("clamp_value", 3, false)
            .await
            .unwrap();
        let second = ExampleSelector::new(Arc::new(FakeHarness { tests }))
            .relevant_test_cases("clamp_value", 3, false)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn no_matching_tests_renders_empty_array() {
        let selector = ExampleSelector::new(Arc::new(FakeHarness { tests: Vec::new() }));
        assert_eq!(
            selector
                .relevant_test_cases("clamp_value", 3, false)
                .await
                .unwrap(),
            "[]"
        );
        assert!(!selector.has_examples("clamp_value").await.unwrap());
    }
}
