//! Test case model and harness script emission.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::alphabet::GLOBAL_SUBPROGRAM;

/// One `identifier: value` pair in a test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueMapping {
    pub identifier: String,
    pub value: String,
}

impl ValueMapping {
    pub fn new(identifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            value: value.into(),
        }
    }

    /// Identifier rewritten into harness pointer notation.
    pub fn harness_identifier(&self) -> String {
        rewrite_identifier(&self.identifier)
    }

    /// Stub implied when this mapping sets a stubbed return value, i.e. the
    /// identifier ends in `.return`.
    pub fn needed_stub_as_input(&self) -> Option<String> {
        let parts: Vec<&str> = self.identifier.split('.').collect();
        if parts.len() >= 3 && *parts.last()? == "return" {
            Some(format!("{}.{}", parts[0], parts[1]))
        } else {
            None
        }
    }

    /// Stub implied when this mapping checks state of another subprogram:
    /// any `unit.sub.entity` identifier on the expected side.
    pub fn needed_stub_as_expected(&self) -> Option<String> {
        let parts: Vec<&str> = self.identifier.split('.').collect();
        if parts.len() >= 3 {
            Some(format!("{}.{}", parts[0], parts[1]))
        } else {
            None
        }
    }
}

fn arrow_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+)->").expect("static regex"))
}

fn deref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*(\w+)\.").expect("static regex"))
}

/// Rewrite C pointer accesses into the harness notation: `a->b` becomes
/// `*a.b`, then any `*a.` becomes `*a[0].`. Applying the rewrite to an
/// already rewritten identifier changes nothing.
pub fn rewrite_identifier(identifier: &str) -> String {
    let patched = arrow_regex().replace_all(identifier, "*$1.");
    deref_regex().replace_all(&patched, "*$1[0].").into_owned()
}

/// A generated test case for a single subprogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub test_name: String,
    pub test_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    pub unit_name: String,
    pub subprogram_name: String,
    pub input_values: Vec<ValueMapping>,
    pub expected_values: Vec<ValueMapping>,
}

impl TestCase {
    /// Copy with rewritten identifiers and exact duplicates dropped, order
    /// preserved. Idempotent.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.input_values = normalize_values(&self.input_values);
        out.expected_values = normalize_values(&self.expected_values);
        out
    }

    /// Subprograms that must be stubbed for this test to run: callees whose
    /// return values are set on the input side, plus any other subprogram
    /// referenced on the expected side. The subprogram under test and the
    /// global pseudo-subprogram are never stubbed.
    pub fn needed_stubs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut stubs = Vec::new();
        let candidates = self
            .input_values
            .iter()
            .filter_map(ValueMapping::needed_stub_as_input)
            .chain(
                self.expected_values
                    .iter()
                    .filter_map(ValueMapping::needed_stub_as_expected),
            );
        for stub in candidates {
            let sub = stub.split('.').nth(1).unwrap_or_default();
            if sub == self.subprogram_name || sub == GLOBAL_SUBPROGRAM {
                continue;
            }
            if seen.insert(stub.clone()) {
                stubs.push(stub);
            }
        }
        stubs
    }

    /// Degrade to a partial test: keep the inputs, drop every expectation,
    /// and mark the name.
    pub fn as_partial(&self) -> Self {
        let mut partial = self.clone();
        partial.test_name = format!("{}-PARTIAL", self.test_name);
        partial.expected_values.clear();
        partial
    }

    /// Render as a harness test script block. With `add_uuid` a short random
    /// suffix is appended to the name so repeated runs never collide.
    pub fn to_script(&self, add_uuid: bool) -> String {
        let normalized = self.normalized();
        let mut script = String::new();
        script.push_str(&format!("TEST.UNIT:{}\n", normalized.unit_name));
        script.push_str(&format!("TEST.SUBPROGRAM:{}\n", normalized.subprogram_name));
        script.push_str("TEST.NEW\n");
        if add_uuid {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            script.push_str(&format!("TEST.NAME:{}-{}\n", normalized.test_name, &suffix[..8]));
        } else {
            script.push_str(&format!("TEST.NAME:{}\n", normalized.test_name));
        }
        if let Some(requirement_id) = &normalized.requirement_id {
            script.push_str(&format!("TEST.REQUIREMENT_KEY:{requirement_id}\n"));
        }
        script.push_str("TEST.NOTES:\n");
        for line in normalized.test_description.split('\n') {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str("TEST.END_NOTES:\n");
        for stub in normalized.needed_stubs() {
            script.push_str(&format!("TEST.STUB:{stub}\n"));
        }
        for input in &normalized.input_values {
            script.push_str(&format!(
                "TEST.VALUE:{}:{}\n",
                input.harness_identifier(),
                input.value
            ));
        }
        for expected in &normalized.expected_values {
            script.push_str(&format!(
                "TEST.EXPECTED:{}:{}\n",
                expected.harness_identifier(),
                expected.value
            ));
        }
        script.push_str("TEST.END\n");
        script
    }
}

fn normalize_values(values: &[ValueMapping]) -> Vec<ValueMapping> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for mapping in values {
        let rewritten = ValueMapping::new(mapping.harness_identifier(), mapping.value.clone());
        if seen.insert(rewritten.clone()) {
            out.push(rewritten);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn test_case() -> TestCase {
        TestCase {
            test_name: "clamp_upper_bound".into(),
            test_description: "Verifies clamping\nat the upper bound.".into(),
            requirement_id: Some("r1".into()),
            unit_name: "sensor".into(),
            subprogram_name: "clamp_value".into(),
            input_values: vec![
                ValueMapping::new("sensor.clamp_value.input", "120"),
                ValueMapping::new("sensor.clamp_value.input", "120"),
                ValueMapping::new("uut_prototype_stubs.read_limit.return", "100"),
            ],
            expected_values: vec![ValueMapping::new("sensor.clamp_value.return", "100")],
        }
    }

    #[test]
    fn rewrite_handles_pointer_chains() {
        assert_eq!(rewrite_identifier("a->b"), "*a[0].b");
        assert_eq!(rewrite_identifier("s.p->field"), "s.*p[0].field");
        assert_eq!(
            rewrite_identifier("obj->inner->value"),
            "*obj[0].*inner[0].value"
        );
        assert_eq!(rewrite_identifier("plain.identifier"), "plain.identifier");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite_identifier("obj->inner->value");
        let twice = rewrite_identifier(&once);
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn rewrite_idempotent_on_arbitrary_identifiers(
            identifier in r"[a-z]{1,4}((->|\.)[a-z]{1,4}){0,4}(\[[0-9]\])?"
        ) {
            let once = rewrite_identifier(&identifier);
            prop_assert_eq!(rewrite_identifier(&once), once);
        }
    }

    #[test]
    fn normalized_drops_exact_duplicates_only() {
        let normalized = test_case().normalized();
        assert_eq!(normalized.input_values.len(), 2);
        // Same identifier with a different value is not a duplicate.
        let mut case = test_case();
        case.input_values
            .push(ValueMapping::new("sensor.clamp_value.input", "7"));
        assert_eq!(case.normalized().input_values.len(), 3);
    }

    #[test]
    fn normalized_is_idempotent() {
        let once = test_case().normalized();
        assert_eq!(once.normalized(), once);
    }

    #[test]
    fn needed_stubs_exclude_self_and_global() {
        let mut case = test_case();
        case.expected_values.push(ValueMapping::new(
            "uut_prototype_stubs.helper.return",
            "1",
        ));
        case.expected_values
            .push(ValueMapping::new("sensor.<<GLOBAL>>.state", "3"));
        assert_eq!(
            case.needed_stubs(),
            vec![
                "uut_prototype_stubs.read_limit".to_string(),
                "uut_prototype_stubs.helper".to_string(),
            ]
        );
    }

    #[test]
    fn as_partial_drops_expectations_and_marks_name() {
        let partial = test_case().as_partial();
        assert_eq!(partial.test_name, "clamp_upper_bound-PARTIAL");
        assert!(partial.expected_values.is_empty());
        assert_eq!(partial.input_values, test_case().input_values);
    }

    #[test]
    fn script_emission_order() {
        let script = test_case().to_script(false);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "TEST.UNIT:sensor",
                "TEST.SUBPROGRAM:clamp_value",
                "TEST.NEW",
                "TEST.NAME:clamp_upper_bound",
                "TEST.REQUIREMENT_KEY:r1",
                "TEST.NOTES:",
                "Verifies clamping",
                "at the upper bound.",
                "TEST.END_NOTES:",
                "TEST.STUB:uut_prototype_stubs.read_limit",
                "TEST.VALUE:sensor.clamp_value.input:120",
                "TEST.VALUE:uut_prototype_stubs.read_limit.return:100",
                "TEST.EXPECTED:sensor.clamp_value.return:100",
                "TEST.END",
            ]
        );
    }

    #[test]
    fn uuid_suffix_changes_only_the_name() {
        let script = test_case().to_script(true);
        let name_line = script
            .lines()
            .find(|l| l.starts_with("TEST.NAME:"))
            .unwrap();
        assert!(name_line.starts_with("TEST.NAME:clamp_upper_bound-"));
        assert_eq!(name_line.len(), "TEST.NAME:clamp_upper_bound-".len() + 8);
    }
}
