//! Test script header emission and parsing.

use crate::testcase::{TestCase, ValueMapping};

/// Script preamble: version banner plus the feature flags our emitted
/// scripts rely on.
pub fn script_header(env_name: &str, units: &[String]) -> String {
    let mut header = String::new();
    header.push_str("-- VectorCAST 6.4s (05/01/17)\n");
    header.push_str("-- Test Case Script\n");
    header.push_str(&format!("-- Environment    : {env_name}\n"));
    header.push_str(&format!("-- Unit(s) Under Test: {}\n", units.join(", ")));
    header.push_str("-- \n");
    header.push_str("-- Script Features\n");
    header.push_str("TEST.SCRIPT_FEATURE:C_DIRECT_ARRAY_INDEXING\n");
    header.push_str("TEST.SCRIPT_FEATURE:CPP_CLASS_OBJECT_REVISION\n");
    header.push_str("TEST.SCRIPT_FEATURE:MULTIPLE_UUT_SUPPORT\n");
    header.push_str("TEST.SCRIPT_FEATURE:MIXED_CASE_NAMES\n");
    header.push_str("TEST.SCRIPT_FEATURE:STATIC_HEADER_FUNCS_IN_UUTS\n");
    header.push_str("--\n\n");
    header
}

/// Parse a test script back into test cases.
///
/// Tolerant by design: scripts come from the harness's own generators as
/// well as from us. Unknown lines inside a NOTES block become description
/// text; anything else unknown is skipped.
pub fn parse_test_script(content: &str) -> Vec<TestCase> {
    let mut test_cases = Vec::new();
    let mut current: Option<TestCase> = None;
    let mut current_unit = String::new();
    let mut current_subprogram = String::new();
    let mut description_lines: Vec<String> = Vec::new();
    let mut in_notes = false;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || (line.starts_with("--") && !line.starts_with("TEST")) {
            continue;
        }

        if let Some(rest) = line.strip_prefix("TEST.UNIT:") {
            current_unit = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("TEST.SUBPROGRAM:") {
            current_subprogram = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("TEST.NAME:") {
            if let Some(test) = current.take() {
                test_cases.push(test);
            }
            current = Some(TestCase {
                test_name: rest.trim().to_string(),
                test_description: String::new(),
                requirement_id: None,
                unit_name: current_unit.clone(),
                subprogram_name: current_subprogram.clone(),
                input_values: Vec::new(),
                expected_values: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("TEST.VALUE:") {
            if let (Some(test), Some(mapping)) = (current.as_mut(), parse_mapping(rest)) {
                test.input_values.push(mapping);
            }
        } else if line.starts_with("TEST.NOTES:") {
            if current.is_some() {
                description_lines.clear();
                in_notes = true;
            }
        } else if line.starts_with("TEST.END_NOTES:") {
            if let Some(test) = current.as_mut() {
                if !description_lines.is_empty() {
                    test.test_description = description_lines.join("\n");
                }
            }
            in_notes = false;
        } else if let Some(rest) = line.strip_prefix("TEST.EXPECTED:") {
            if let (Some(test), Some(mapping)) = (current.as_mut(), parse_mapping(rest)) {
                test.expected_values.push(mapping);
            }
        } else if in_notes {
            description_lines.push(line.to_string());
        } else if line.starts_with("TEST.END") {
            if let Some(test) = current.take() {
                test_cases.push(test);
            }
        }
    }

    if let Some(test) = current.take() {
        test_cases.push(test);
    }
    test_cases
}

/// `identifier:value`, where the identifier may itself contain colons in
/// template arguments, so the value is split off the right.
fn parse_mapping(rest: &str) -> Option<ValueMapping> {
    let (identifier, value) = rest.rsplit_once(':')?;
    Some(ValueMapping::new(identifier.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_lists_features_and_units() {
        let header = script_header("CLAMP", &["sensor".to_string(), "filter".to_string()]);
        assert!(header.contains("-- Environment    : CLAMP\n"));
        assert!(header.contains("-- Unit(s) Under Test: sensor, filter\n"));
        assert_eq!(header.matches("TEST.SCRIPT_FEATURE:").count(), 5);
    }

    #[test]
    fn parses_multiple_tests_with_notes() {
        let script = "\
-- comment line
TEST.UNIT:sensor
TEST.SUBPROGRAM:clamp_value
TEST.NEW
TEST.NAME:upper_bound
TEST.NOTES:
Checks the upper clamp.
Across two lines.
TEST.END_NOTES:
TEST.VALUE:sensor.clamp_value.raw:120
TEST.EXPECTED:sensor.clamp_value.return:100
TEST.END

TEST.SUBPROGRAM:scale_value
TEST.NEW
TEST.NAME:identity
TEST.VALUE:sensor.scale_value.x:1
TEST.END
";
        let tests = parse_test_script(script);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].test_name, "upper_bound");
        assert_eq!(tests[0].subprogram_name, "clamp_value");
        assert_eq!(
            tests[0].test_description,
            "Checks the upper clamp.\nAcross two lines."
        );
        assert_eq!(tests[0].input_values.len(), 1);
        assert_eq!(tests[0].expected_values.len(), 1);
        // The unit sticks until redefined.
        assert_eq!(tests[1].unit_name, "sensor");
        assert_eq!(tests[1].subprogram_name, "scale_value");
    }

    #[test]
    fn value_split_is_rightmost_colon() {
        let script = "\
TEST.UNIT:u
TEST.SUBPROGRAM:f
TEST.NAME:t
TEST.VALUE:u.Outer::f.arg:5
TEST.END
";
        let tests = parse_test_script(script);
        assert_eq!(
            tests[0].input_values[0],
            ValueMapping::new("u.Outer::f.arg", "5")
        );
    }

    #[test]
    fn unterminated_test_is_still_collected() {
        let script = "TEST.UNIT:u\nTEST.SUBPROGRAM:f\nTEST.NAME:t\n";
        assert_eq!(parse_test_script(script).len(), 1);
    }

    #[test]
    fn round_trips_emitted_scripts() {
        let case = TestCase {
            test_name: "upper".into(),
            test_description: "desc".into(),
            requirement_id: None,
            unit_name: "sensor".into(),
            subprogram_name: "clamp_value".into(),
            input_values: vec![ValueMapping::new("sensor.clamp_value.raw", "7")],
            expected_values: vec![ValueMapping::new("sensor.clamp_value.return", "7")],
        };
        let parsed = parse_test_script(&case.to_script(false));
        assert_eq!(parsed, vec![case]);
    }
}
