//! Classification of harness run output into errors and test failures.

use std::sync::OnceLock;

use regex::Regex;

/// Parsed harness output for one test run.
///
/// `errors` hold script/compile diagnostics that make the run unusable;
/// `test_failures` hold executed-but-failing expectation lines. Either is
/// `None` when that category is absent. Clean output yields both `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Option<String>,
    pub test_failures: Option<String>,
}

fn error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(E\)").expect("static regex"))
}

fn fail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s+FAIL\s+\]").expect("static regex"))
}

fn blank_result_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s+\]").expect("static regex"))
}

impl Diagnostics {
    /// True when the run produced neither errors nor failures.
    pub fn is_clean(&self) -> bool {
        self.errors.is_none() && self.test_failures.is_none()
    }

    /// Parse raw harness output.
    ///
    /// `(E)` lines start an error block; indented or blank lines continue
    /// it. `(E)` lines about `TEST.REQUIREMENT_KEY` are harness noise for
    /// environments without a requirement gateway and are skipped. A
    /// `Compile Failed` marker overrides failure scanning: everything from
    /// the marker on becomes one error block. Otherwise expectation lines
    /// marked `[  FAIL  ]` or left blank `[  ]` count as test failures,
    /// stopping at the `========` summary separator.
    pub fn parse(output: &str) -> Self {
        let mut error_lines: Vec<&str> = Vec::new();
        let mut fail_lines: Vec<String> = Vec::new();

        let lines: Vec<&str> = output.split('\n').collect();
        let mut collecting_error = false;
        for line in &lines {
            if error_regex().is_match(line) {
                if line.contains("TEST.REQUIREMENT_KEY") {
                    continue;
                }
                error_lines.push(line);
                collecting_error = true;
                continue;
            }
            if collecting_error {
                if line.starts_with("    ") || line.trim().is_empty() {
                    error_lines.push(line);
                } else {
                    collecting_error = false;
                }
            }
        }

        if let Some(index) = output.find("Compile Failed") {
            let compile_error = output[index..].trim();
            if !compile_error.is_empty() {
                error_lines.push(compile_error);
            }
        } else {
            for line in &lines {
                if line.contains("========") {
                    break;
                }
                if fail_regex().is_match(line) || blank_result_regex().is_match(line) {
                    fail_lines.push(line.trim().to_string());
                }
            }
        }

        Self {
            errors: if error_lines.is_empty() {
                None
            } else {
                Some(error_lines.join("\n"))
            },
            test_failures: if fail_lines.is_empty() {
                None
            } else {
                Some(fail_lines.join("\n"))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clean_output_yields_no_diagnostics() {
        let output = "Running tests\n  Expected values matched [ PASS ]\n======== Summary\n";
        let diagnostics = Diagnostics::parse(output);
        assert!(diagnostics.is_clean());
    }

    #[test]
    fn error_blocks_include_indented_continuation() {
        let output = "(E) Unknown identifier: sensor.clamp_value.bogus\n    at line 4 of script\n\nunrelated line\n(E) Second error\n";
        let diagnostics = Diagnostics::parse(output);
        let errors = diagnostics.errors.unwrap();
        assert!(errors.contains("Unknown identifier"));
        assert!(errors.contains("    at line 4 of script"));
        assert!(errors.contains("Second error"));
        assert!(!errors.contains("unrelated line"));
    }

    #[test]
    fn requirement_key_errors_are_skipped() {
        let output = "(E) TEST.REQUIREMENT_KEY: no requirement gateway configured\n";
        let diagnostics = Diagnostics::parse(output);
        assert!(diagnostics.is_clean());
    }

    #[test]
    fn compile_failed_overrides_failure_scan() {
        let output = "some output\nresult [  FAIL  ]\nCompile Failed\nerror: expected ';'\n";
        let diagnostics = Diagnostics::parse(output);
        let errors = diagnostics.errors.unwrap();
        assert!(errors.starts_with("Compile Failed"));
        assert!(errors.contains("expected ';'"));
        // Failure lines are not collected when compilation failed.
        assert_eq!(diagnostics.test_failures, None);
    }

    #[test]
    fn failures_collected_until_separator() {
        let output = "\
Expected sensor.clamp_value.return 100 got 120 [  FAIL  ]
Expected sensor.state.mode [  ]
======== Summary
Later [  FAIL  ] should be ignored
";
        let diagnostics = Diagnostics::parse(output);
        let failures = diagnostics.test_failures.unwrap();
        assert_eq!(
            failures,
            "Expected sensor.clamp_value.return 100 got 120 [  FAIL  ]\nExpected sensor.state.mode [  ]"
        );
        assert_eq!(diagnostics.errors, None);
    }

    #[test]
    fn requirement_key_only_output_is_clean() {
        let output = "\
(E) TEST.REQUIREMENT_KEY: key r1 not known to this environment
Test execution passed [ PASS ]
======== Summary
";
        assert!(Diagnostics::parse(output).is_clean());
    }
}
