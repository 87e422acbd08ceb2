//! Per-requirement generation metrics.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// What happened while generating one requirement's test. Consumed by
/// downstream reporting only; never read back by the generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoRecord {
    pub individual_test_generation_needed: bool,
    pub error_correction_needed: bool,
    pub test_run_failure_feedback: bool,
    pub test_generated: bool,
    pub partial_test_generated: bool,
    pub found_no_allowed_identifiers: bool,
    pub schema_exceeded_size: bool,
    pub no_atg_examples: bool,
    pub used_code_context_fallback: bool,
    pub used_atg_identifier_fallback: bool,
    pub retries_used: u32,
    pub exceptions: Vec<String>,
}

/// Thread-safe map of requirement key to its [`InfoRecord`].
#[derive(Debug, Default)]
pub struct InfoLog {
    records: Mutex<HashMap<String, InfoRecord>>,
}

impl InfoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the record for a requirement. Called once when generation for
    /// the requirement starts; a batched-to-single handoff does not reset.
    pub fn start_requirement(&self, key: &str) {
        self.with(key, |record| *record = InfoRecord::default());
    }

    fn with(&self, key: &str, update: impl FnOnce(&mut InfoRecord)) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        update(records.entry(key.to_string()).or_default());
    }

    pub fn set_individual_test_generation_needed(&self, key: &str) {
        self.with(key, |r| r.individual_test_generation_needed = true);
    }

    pub fn set_error_correction_needed(&self, key: &str) {
        self.with(key, |r| r.error_correction_needed = true);
    }

    pub fn set_test_run_failure_feedback(&self, key: &str) {
        self.with(key, |r| r.test_run_failure_feedback = true);
    }

    pub fn set_test_generated(&self, key: &str) {
        self.with(key, |r| r.test_generated = true);
    }

    pub fn set_partial_test_generated(&self, key: &str) {
        self.with(key, |r| r.partial_test_generated = true);
    }

    pub fn set_found_no_allowed_identifiers(&self, key: &str, value: bool) {
        self.with(key, |r| r.found_no_allowed_identifiers = value);
    }

    pub fn set_schema_exceeded_size(&self, key: &str, value: bool) {
        self.with(key, |r| r.schema_exceeded_size = value);
    }

    pub fn set_no_atg_examples(&self, key: &str, value: bool) {
        self.with(key, |r| r.no_atg_examples = value);
    }

    pub fn set_used_code_context_fallback(&self, key: &str, value: bool) {
        self.with(key, |r| r.used_code_context_fallback = value);
    }

    pub fn set_used_atg_identifier_fallback(&self, key: &str, value: bool) {
        self.with(key, |r| r.used_atg_identifier_fallback = value);
    }

    pub fn increment_retries_used(&self, key: &str) {
        self.with(key, |r| r.retries_used += 1);
    }

    pub fn add_exception(&self, key: &str, exception: impl Into<String>) {
        let exception = exception.into();
        self.with(key, |r| r.exceptions.push(exception));
    }

    pub fn get(&self, key: &str) -> Option<InfoRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(key).cloned()
    }

    /// Snapshot of all records.
    pub fn snapshot(&self) -> HashMap<String, InfoRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_requirement_resets_prior_state() {
        let log = InfoLog::new();
        log.set_test_generated("REQ-1");
        log.increment_retries_used("REQ-1");
        log.start_requirement("REQ-1");
        assert_eq!(log.get("REQ-1"), Some(InfoRecord::default()));
    }

    #[test]
    fn setters_accumulate_on_one_record() {
        let log = InfoLog::new();
        log.start_requirement("REQ-1");
        log.set_error_correction_needed("REQ-1");
        log.increment_retries_used("REQ-1");
        log.increment_retries_used("REQ-1");
        log.add_exception("REQ-1", "timeout");
        let record = log.get("REQ-1").unwrap();
        assert!(record.error_correction_needed);
        assert_eq!(record.retries_used, 2);
        assert_eq!(record.exceptions, vec!["timeout"]);
        assert!(!record.test_generated);
    }
}
