//! Requirement and collection types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a requirement lives in the codebase.
///
/// `lines` are 1-based inclusive line numbers into the reduced translation
/// unit of `unit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub unit: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<u32>>,
}

impl Location {
    pub fn new(unit: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            function: function.into(),
            lines: None,
        }
    }

    pub fn with_lines(mut self, lines: Vec<u32>) -> Self {
        self.lines = Some(lines);
        self
    }
}

/// A single requirement traced to a function.
///
/// Decomposed requirements carry `original_key` pointing at the parent they
/// were split from; their `key` and `id` get a `.N` suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Unique stable key within a collection.
    pub key: String,
    /// Human-facing requirement identifier.
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_key: Option<String>,
}

impl Requirement {
    pub fn new(
        key: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            title: title.into(),
            description: description.into(),
            location,
            original_key: None,
        }
    }

    /// True if this requirement was produced by decomposition.
    pub fn is_decomposed(&self) -> bool {
        self.original_key.is_some()
    }

    /// Derive the `i`-th (1-based) atomic child of this requirement.
    pub fn decomposed_child(&self, index: usize, description: impl Into<String>) -> Self {
        Self {
            key: format!("{}.{}", self.key, index),
            id: format!("{}.{}", self.id, index),
            title: self.title.clone(),
            description: description.into(),
            location: self.location.clone(),
            original_key: Some(self.key.clone()),
        }
    }
}

/// An ordered set of requirements with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementsCollection {
    items: Vec<Requirement>,
}

impl RequirementsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a vector, rejecting duplicate keys.
    pub fn from_vec(items: Vec<Requirement>) -> Result<Self> {
        let mut collection = Self::new();
        for requirement in items {
            collection.push(requirement)?;
        }
        Ok(collection)
    }

    /// Append a requirement. Fails if the key is already present.
    pub fn push(&mut self, requirement: Requirement) -> Result<()> {
        if self.get(&requirement.key).is_some() {
            return Err(Error::Requirements(format!(
                "duplicate requirement key: {}",
                requirement.key
            )));
        }
        self.items.push(requirement);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Requirement> {
        self.items.iter().find(|r| r.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|r| r.key.clone()).collect()
    }

    /// Requirements of a single function, in collection order.
    pub fn for_function(&self, function: &str) -> Vec<&Requirement> {
        self.items
            .iter()
            .filter(|r| r.location.function == function)
            .collect()
    }

    /// Group requirement keys by function, preserving first-seen function
    /// order and in-function requirement order.
    pub fn keys_by_function(&self) -> Vec<(String, Vec<String>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for requirement in &self.items {
            let function = requirement.location.function.clone();
            if !groups.contains_key(&function) {
                order.push(function.clone());
            }
            groups.entry(function).or_default().push(requirement.key.clone());
        }
        order
            .into_iter()
            .map(|function| {
                let keys = groups.remove(&function).unwrap_or_default();
                (function, keys)
            })
            .collect()
    }

    pub fn into_vec(self) -> Vec<Requirement> {
        self.items
    }
}

impl IntoIterator for RequirementsCollection {
    type Item = Requirement;
    type IntoIter = std::vec::IntoIter<Requirement>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn req(key: &str, function: &str) -> Requirement {
        Requirement::new(
            key,
            key.to_uppercase(),
            format!("title {key}"),
            format!("description {key}"),
            Location::new("unit", function),
        )
    }

    #[test]
    fn push_rejects_duplicate_keys() {
        let mut collection = RequirementsCollection::new();
        collection.push(req("r1", "f")).unwrap();
        let err = collection.push(req("r1", "g")).unwrap_err();
        assert!(err.to_string().contains("duplicate requirement key"));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn keys_by_function_preserves_order() {
        let collection = RequirementsCollection::from_vec(vec![
            req("a", "alpha"),
            req("b", "beta"),
            req("c", "alpha"),
            req("d", "gamma"),
        ])
        .unwrap();

        let groups = collection.keys_by_function();
        assert_eq!(
            groups,
            vec![
                ("alpha".to_string(), vec!["a".to_string(), "c".to_string()]),
                ("beta".to_string(), vec!["b".to_string()]),
                ("gamma".to_string(), vec!["d".to_string()]),
            ]
        );
    }

    #[test]
    fn decomposed_child_derives_keys_and_parent_link() {
        let parent = req("r7", "f");
        let child = parent.decomposed_child(2, "atomic part");
        assert_eq!(child.key, "r7.2");
        assert_eq!(child.id, "R7.2");
        assert_eq!(child.original_key.as_deref(), Some("r7"));
        assert_eq!(child.location, parent.location);
        assert!(child.is_decomposed());
        assert!(!parent.is_decomposed());
    }
}
