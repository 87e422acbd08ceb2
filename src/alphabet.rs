//! Allowed identifier alphabet extraction.
//!
//! The harness exposes one global list of settable/checkable identifiers of
//! the form `unit.subprogram.entity[...]`. Per target function we keep the
//! subset that is textually relevant to the function body, with optional
//! filters for identifiers that only make sense on one side of a test
//! (surely-stubbed inputs vs stubbed returns).

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

/// Pseudo-unit holding prototype stubs for undefined callees.
pub const STUB_UNIT: &str = "uut_prototype_stubs";
/// Pseudo-unit holding user globals; its identifiers are always relevant.
pub const GLOBALS_UNIT: &str = "USER_GLOBALS_VCAST";
/// Pseudo-subprogram for unit-level globals.
pub const GLOBAL_SUBPROGRAM: &str = "<<GLOBAL>>";

/// Filtering options for one extraction.
#[derive(Debug, Clone, Copy)]
pub struct AlphabetOptions {
    /// Drop identifiers whose array index exceeds this bound.
    pub max_array_index: u32,
    /// Drop stub-unit identifiers that set inputs of stubbed callees.
    pub remove_surely_stubbed_inputs: bool,
    /// Drop stub-unit identifiers ending in `.return`.
    pub remove_surely_stubbed_returns: bool,
}

impl Default for AlphabetOptions {
    fn default() -> Self {
        Self {
            max_array_index: 32,
            remove_surely_stubbed_inputs: false,
            remove_surely_stubbed_returns: false,
        }
    }
}

/// One extracted alphabet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alphabet {
    /// Relevant identifiers in global-list order, deduplicated.
    pub identifiers: Vec<String>,
    /// True when pruning emptied the alphabet and the unpruned body was used.
    pub used_unpruned_fallback: bool,
}

/// The three alphabet variants the schema builder consumes, extracted once
/// per (function, focus) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlphabetSet {
    /// Input-side alphabet: no surely-stubbed inputs, stub returns kept.
    pub inputs: Vec<String>,
    /// Expected-side alphabet: no stub returns.
    pub expecteds: Vec<String>,
    /// Unfiltered alphabet for the unified schema mode.
    pub unified: Vec<String>,
    /// True when the global list came from auto-generated example tests.
    pub used_atg_fallback: bool,
    pub used_unpruned_fallback: bool,
}

impl AlphabetSet {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.expecteds.is_empty()
    }
}

fn index_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static regex"))
}

/// Extract the alphabet relevant to a function body. When `pruned_body` is
/// given it is searched first; an empty result falls back to the full body.
pub fn extract(
    global: &[String],
    body: &str,
    pruned_body: Option<&str>,
    options: &AlphabetOptions,
) -> Alphabet {
    if let Some(pruned) = pruned_body {
        let identifiers = filter_relevant(global, pruned, options);
        if !identifiers.is_empty() {
            return Alphabet {
                identifiers,
                used_unpruned_fallback: false,
            };
        }
        debug!("pruned body yielded no identifiers, falling back to full body");
        let identifiers = filter_relevant(global, body, options);
        return Alphabet {
            identifiers,
            used_unpruned_fallback: true,
        };
    }
    Alphabet {
        identifiers: filter_relevant(global, body, options),
        used_unpruned_fallback: false,
    }
}

/// Extract the input/expected/unified alphabet variants in one pass.
pub fn extract_set(
    global: &[String],
    body: &str,
    pruned_body: Option<&str>,
    max_array_index: u32,
    used_atg_fallback: bool,
) -> AlphabetSet {
    let variant = |inputs, returns| {
        extract(
            global,
            body,
            pruned_body,
            &AlphabetOptions {
                max_array_index,
                remove_surely_stubbed_inputs: inputs,
                remove_surely_stubbed_returns: returns,
            },
        )
    };
    let input_side = variant(true, false);
    let expected_side = variant(false, true);
    let unified = variant(false, false);
    AlphabetSet {
        used_unpruned_fallback: input_side.used_unpruned_fallback
            || expected_side.used_unpruned_fallback,
        inputs: input_side.identifiers,
        expecteds: expected_side.identifiers,
        unified: unified.identifiers,
        used_atg_fallback,
    }
}

fn filter_relevant(global: &[String], body: &str, options: &AlphabetOptions) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for identifier in global {
        if !keep_identifier(identifier, body, options) {
            continue;
        }
        if seen.insert(identifier.clone()) {
            out.push(identifier.clone());
        }
    }
    out
}

fn keep_identifier(identifier: &str, body: &str, options: &AlphabetOptions) -> bool {
    if identifier.contains(".str.") {
        return false;
    }
    for capture in index_regex().captures_iter(identifier) {
        match capture[1].parse::<u32>() {
            Ok(index) if index > options.max_array_index => return false,
            Ok(_) => {}
            Err(_) => return false,
        }
    }

    let mut parts = identifier.splitn(3, '.');
    let (unit, sub, entity) = match (parts.next(), parts.next(), parts.next()) {
        (Some(unit), Some(sub), Some(entity)) => (unit, sub, entity),
        _ => {
            // Malformed entries come straight from the harness; keep them
            // rather than silently narrowing the alphabet.
            warn!("unexpected identifier shape: {identifier}");
            return true;
        }
    };

    if unit == GLOBALS_UNIT || entity == "(cl)" {
        return true;
    }
    if unit == STUB_UNIT {
        if identifier.ends_with(".return") {
            return !options.remove_surely_stubbed_returns;
        }
        return !options.remove_surely_stubbed_inputs;
    }

    // Strip a namespace qualifier and any index from the subprogram.
    let sub = sub.rsplit("::").next().unwrap_or(sub);
    let sub = sub.split('[').next().unwrap_or(sub);
    let search_term = if sub == GLOBAL_SUBPROGRAM {
        entity.split(['[', '.']).next().unwrap_or(entity)
    } else {
        sub
    };
    body.contains(search_term)
}
