//! Code context assembly for prompts.
//!
//! The context for a function is its definition plus collapsed definitions
//! of everything it references, extracted from the medium-reduction
//! translation unit. When the function cannot be located in the parse
//! tree, the high-reduction translation unit stands in wholesale.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use crate::analysis::{prune_code, CodeIndex};
use crate::error::Result;
use crate::harness::{Harness, ReductionLevel};

type CacheKey = (String, Option<Vec<usize>>);

/// Builds and caches per-function code contexts.
pub struct ContextBuilder {
    harness: Arc<dyn Harness>,
    index: OnceCell<Option<CodeIndex>>,
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<(String, bool)>>>>,
}

impl ContextBuilder {
    pub fn new(harness: Arc<dyn Harness>) -> Self {
        Self {
            harness,
            index: OnceCell::new(),
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The context for `function_name`, plus a flag set when the reduced
    /// translation unit had to stand in for a proper per-function context.
    ///
    /// `focus_lines` (0-based, into the function body) prunes the body down
    /// to the control flow around those lines. `include_unit_name` prefixes
    /// the context with the unit under test.
    pub async fn build_code_context(
        &self,
        function_name: &str,
        focus_lines: Option<&[usize]>,
        include_unit_name: bool,
    ) -> Result<(String, bool)> {
        let key: CacheKey = (function_name.to_string(), focus_lines.map(<[usize]>::to_vec));
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key).or_default())
        };
        let (context, used_fallback) = cell
            .get_or_try_init(|| self.build_uncached(function_name, focus_lines))
            .await?;

        let mut context = context.clone();
        if include_unit_name {
            let units = self.harness.units().await?;
            if let Some(unit_name) = units.first() {
                context = format!("// Unit: {unit_name}\n\n{context}");
            }
        }
        Ok((context, *used_fallback))
    }

    async fn build_uncached(
        &self,
        function_name: &str,
        focus_lines: Option<&[usize]>,
    ) -> Result<(String, bool)> {
        if let Some(index) = self.code_index().await? {
            if let Some(context) = self.reduce_with_ast(index, function_name, focus_lines) {
                return Ok((context, false));
            }
        }
        warn!("falling back to reduced translation unit for {function_name}");
        let fallback = self.harness.tu_content(ReductionLevel::High).await?;
        Ok((fallback, true))
    }

    /// The symbol index over the medium-reduction translation unit.
    /// `None` when the dump does not parse.
    pub async fn code_index(&self) -> Result<&Option<CodeIndex>> {
        self.index
            .get_or_try_init(|| async {
                let source = self.harness.tu_content(ReductionLevel::Medium).await?;
                match CodeIndex::new(source) {
                    Ok(index) => Ok(Some(index)),
                    Err(e) => {
                        warn!("failed to parse translation unit: {e}");
                        Ok(None)
                    }
                }
            })
            .await
    }

    fn reduce_with_ast(
        &self,
        index: &CodeIndex,
        function_name: &str,
        focus_lines: Option<&[usize]>,
    ) -> Option<String> {
        let definitions = index.referenced_definitions(function_name)?;
        let mut function_code = index.function_definition(function_name)?;

        if let Some(lines) = focus_lines {
            if lines.is_empty() {
                warn!("no relevant lines found for {function_name}, keeping full body");
            } else {
                match prune_code(&function_code, lines) {
                    Ok(pruned) => function_code = pruned,
                    Err(e) => warn!("failed to prune {function_name}: {e}"),
                }
            }
        }

        let mut parts =
            vec!["// Definitions of types, called functions and data structures:".to_string()];
        for definition in definitions {
            parts.push(format!("\n{definition}"));
        }
        parts.push(format!("\n// Code for {function_name}:\n{function_code}"));
        Some(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testcase::TestCase;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TU: &str = "\
#define LIMIT 100

int helper(int x) {
    return x + 1;
}

int clamp_value(int raw) {
    int adjusted = helper(raw);
    if (adjusted > LIMIT) {
        return LIMIT;
    }
    return adjusted;
}
";

    struct FakeHarness {
        tu_calls: AtomicUsize,
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
        async fn tu_content(&self, level: ReductionLevel) -> Result<String> {
            self.tu_calls.fetch_add(1, Ordering::SeqCst);
            Ok(match level {
                ReductionLevel::High => "high reduction".to_string(),
                _ => TU.to_string(),
            })
        }
        async fn atg_tests(&self) -> Result<Vec<TestCase>> {
            Ok(Vec::new())
        }
        async fn basis_path_tests(&self) -> Result<Vec<TestCase>> {
            Ok(Vec::new())
        }
    }

    fn builder() -> (ContextBuilder, Arc<FakeHarness>) {
        let harness = Arc::new(FakeHarness {
            tu_calls: AtomicUsize::new(0),
        });
        (ContextBuilder::new(Arc::clone(&harness) as Arc<dyn Harness>), harness)
    }

    #[tokio::test]
    async fn builds_function_context_with_references() {
        let (builder, _) = builder();
        let (context, used_fallback) = builder
            .build_code_context("clamp_value", None, false)
            .await
            .unwrap();
        assert!(!used_fallback);
        assert!(context.starts_with("// Definitions of types"));
        assert!(context.contains("#define LIMIT 100"));
        assert!(context.contains("int helper(int x);"));
        assert!(context.contains("// Code for clamp_value:"));
        assert!(context.contains("int clamp_value(int raw)"));
    }

    #[tokio::test]
    async fn unknown_function_falls_back_to_reduced_tu() {
        let (builder, _) = builder();
        let (context, used_fallback) = builder
            .build_code_context("missing", None, false)
            .await
            .unwrap();
        assert!(used_fallback);
        assert_eq!(context, "high reduction");
    }

    #[tokio::test]
    async fn caches_per_function_and_prefixes_unit() {
        let (builder, harness) = builder();
        builder
            .build_code_context("clamp_value", None, false)
            .await
            .unwrap();
        let calls_after_first = harness.tu_calls.load(Ordering::SeqCst);
        let (context, _) = builder
            .build_code_context("clamp_value", None, true)
            .await
            .unwrap();
        // Second build reuses the cached context, only the prefix differs.
        assert_eq!(harness.tu_calls.load(Ordering::SeqCst), calls_after_first);
        assert!(context.starts_with("// Unit: sensor\n\n"));
    }

    #[tokio::test]
    async fn focus_lines_prune_the_body() {
        let (builder, _) = builder();
        // Body line 2 (0-based) is the guarded return.
        let (context, _) = builder
            .build_code_context("clamp_value", Some(&[2]), false)
            .await
            .unwrap();
        assert!(context.contains("if (adjusted > LIMIT)"));
    }
}
