//! Structured-output schema construction.
//!
//! The schema constrains generated value mappings to the allowed
//! identifier alphabet. Alphabets can be too large for the structured
//! output metadata limits, so the builder degrades stepwise: per-side
//! enumerations, one shared enumeration, free strings.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::alphabet::AlphabetSet;

const MAX_ENUM_IDENTIFIERS: usize = 250;

/// How identifiers are constrained in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierMode {
    /// Separate enumerations for input and expected identifiers.
    InputExpected,
    /// One shared enumeration for both sides.
    Unified,
    /// Free strings, no enumeration.
    Generic,
}

/// How the schema was derived, for downstream metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaGenInfo {
    pub no_identifiers_found: bool,
    pub used_atg_identifiers: bool,
    pub too_many_identifiers: bool,
    pub input_identifiers: Vec<String>,
    pub expected_identifiers: Vec<String>,
}

/// A completion schema ready for a structured request.
#[derive(Debug, Clone)]
pub struct BuiltSchema {
    pub name: String,
    pub schema: Value,
    pub mode: IdentifierMode,
    pub info: SchemaGenInfo,
}

/// Builds completion schemas from a function's identifier alphabet.
pub struct SchemaBuilder {
    alphabet: AlphabetSet,
}

impl SchemaBuilder {
    pub fn new(alphabet: AlphabetSet) -> Self {
        Self { alphabet }
    }

    /// Derive the completion schema, degrading until the result fits the
    /// structured-output limits. `batch_size` switches to the batched
    /// wrapper with one test case slot per requirement.
    pub fn derive_completion_schema(&self, batch_size: Option<usize>) -> BuiltSchema {
        let mut schema_info = SchemaGenInfo {
            no_identifiers_found: self.alphabet.is_empty(),
            used_atg_identifiers: self.alphabet.used_atg_fallback,
            too_many_identifiers: false,
            input_identifiers: self.alphabet.inputs.clone(),
            expected_identifiers: self.alphabet.expecteds.clone(),
        };

        let modes = if schema_info.no_identifiers_found {
            &[IdentifierMode::Generic][..]
        } else {
            &[
                IdentifierMode::InputExpected,
                IdentifierMode::Unified,
                IdentifierMode::Generic,
            ][..]
        };

        for &mode in modes {
            if mode != IdentifierMode::Generic && self.too_many_identifiers(mode) {
                schema_info.too_many_identifiers = true;
                continue;
            }
            let schema = self.completion_schema(mode, batch_size);
            let issues = validate_structured_output_schema(&schema);
            if mode == IdentifierMode::Generic || issues.is_empty() {
                info!(
                    "derived {:?} completion schema, {} chars",
                    mode,
                    schema.to_string().len()
                );
                return BuiltSchema {
                    name: schema_name(),
                    schema,
                    mode,
                    info: schema_info,
                };
            }
            warn!(
                "schema too large for structured output, relaxing:\n{}",
                issues.join("\n")
            );
            schema_info.too_many_identifiers = true;
        }
        unreachable!("generic mode always produces a valid schema")
    }

    fn too_many_identifiers(&self, mode: IdentifierMode) -> bool {
        match mode {
            IdentifierMode::InputExpected => {
                self.alphabet.inputs.len() > MAX_ENUM_IDENTIFIERS
                    || self.alphabet.expecteds.len() > MAX_ENUM_IDENTIFIERS
            }
            IdentifierMode::Unified => self.alphabet.unified.len() > MAX_ENUM_IDENTIFIERS,
            IdentifierMode::Generic => false,
        }
    }

    fn completion_schema(&self, mode: IdentifierMode, batch_size: Option<usize>) -> Value {
        let (input_alphabet, expected_alphabet) = match mode {
            IdentifierMode::InputExpected => {
                (Some(&self.alphabet.inputs), Some(&self.alphabet.expecteds))
            }
            IdentifierMode::Unified => (Some(&self.alphabet.unified), Some(&self.alphabet.unified)),
            IdentifierMode::Generic => (None, None),
        };
        let test_case = test_case_schema(
            input_alphabet.map(Vec::as_slice),
            expected_alphabet.map(Vec::as_slice),
        );

        match batch_size {
            None => json!({
                "type": "object",
                "properties": {"test_case": test_case},
                "required": ["test_case"],
                "additionalProperties": false,
            }),
            Some(batch_size) => {
                let keys: Vec<String> = (1..=batch_size)
                    .map(|i| format!("test_case_for_requirement_{i}"))
                    .collect();
                let mut properties = serde_json::Map::new();
                for key in &keys {
                    properties.insert(key.clone(), test_case.clone());
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": keys,
                    "additionalProperties": false,
                })
            }
        }
    }
}

/// Schema names carry a timestamp so concurrently derived schemas stay
/// distinguishable in logs; the cache canonicaliser strips it again.
fn schema_name() -> String {
    format!(
        "test_generation_result_{}",
        chrono::Utc::now().timestamp_millis()
    )
}

fn identifier_schema(alphabet: Option<&[String]>) -> Value {
    match alphabet {
        Some(identifiers) if !identifiers.is_empty() => json!({
            "type": "string",
            "enum": identifiers,
        }),
        _ => json!({"type": "string"}),
    }
}

fn value_mapping_schema(alphabet: Option<&[String]>) -> Value {
    json!({
        "type": "object",
        "properties": {
            "identifier": identifier_schema(alphabet),
            "value": {"type": "string"},
        },
        "required": ["identifier", "value"],
        "additionalProperties": false,
    })
}

fn test_case_schema(
    input_alphabet: Option<&[String]>,
    expected_alphabet: Option<&[String]>,
) -> Value {
    json!({
        "type": "object",
        "properties": {
            "requirement_id": {"type": "string"},
            "test_name": {"type": "string"},
            "test_description": {"type": "string"},
            "unit_name": {"type": "string"},
            "subprogram_name": {"type": "string"},
            "input_values": {"type": "array", "items": value_mapping_schema(input_alphabet)},
            "expected_values": {"type": "array", "items": value_mapping_schema(expected_alphabet)},
        },
        "required": [
            "requirement_id",
            "test_name",
            "test_description",
            "unit_name",
            "subprogram_name",
            "input_values",
            "expected_values",
        ],
        "additionalProperties": false,
    })
}

/// Check a schema against the provider's structured-output limits.
/// Returns a list of violations; empty means usable.
pub fn validate_structured_output_schema(schema: &Value) -> Vec<String> {
    struct Totals {
        properties: usize,
        string_length: usize,
        enum_values: usize,
        errors: Vec<String>,
    }

    fn traverse(node: &Value, depth: usize, totals: &mut Totals) {
        if depth > 5 {
            totals.errors.push(format!("Exceeded max nesting depth: {depth} > 5"));
        }
        if node["type"] == "object" {
            if let Some(properties) = node["properties"].as_object() {
                totals.properties += properties.len();
                if !properties.is_empty() && totals.properties > 100 {
                    totals.errors.push(format!(
                        "Total properties {} exceeds limit of 100",
                        totals.properties
                    ));
                }
                for (name, sub) in properties {
                    totals.string_length += name.len();
                    traverse(sub, depth + 1, totals);
                }
            }
        }
        if node["type"] == "string" {
            if let Some(values) = node["enum"].as_array() {
                let length: usize = values
                    .iter()
                    .map(|v| v.as_str().map_or(0, str::len))
                    .sum();
                totals.enum_values += values.len();
                totals.string_length += length;
                if values.len() > 250 && length > 7500 {
                    totals.errors.push(format!(
                        "Enum property has {} values and total length {length} exceeds 7500",
                        values.len()
                    ));
                }
            }
        }
        for key in ["$defs", "definitions", "allOf", "anyOf", "oneOf"] {
            match &node[key] {
                Value::Object(children) => {
                    for child in children.values() {
                        traverse(child, depth, totals);
                    }
                }
                Value::Array(children) => {
                    for child in children {
                        traverse(child, depth, totals);
                    }
                }
                _ => {}
            }
        }
        if let Some(items) = node.get("items") {
            traverse(items, depth + 1, totals);
        }
    }

    let mut totals = Totals {
        properties: 0,
        string_length: 0,
        enum_values: 0,
        errors: Vec::new(),
    };
    traverse(schema, 1, &mut totals);
    if totals.string_length > 15000 {
        totals.errors.push(format!(
            "Total string length {} exceeds limit of 15000 characters",
            totals.string_length
        ));
    }
    if totals.enum_values > 500 {
        totals.errors.push(format!(
            "Total enum values {} exceeds limit of 500",
            totals.enum_values
        ));
    }
    totals.errors
}
