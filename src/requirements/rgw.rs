//! Requirements gateway directory adapter.
//!
//! The gateway stores requirements under
//! `<gateway>/requirements_gateway/requirements.json` (older harness versions
//! write `repository.json`), grouped as `{group: {key: {id, title,
//! description}}}` or wrapped under a top-level `requirements` object.
//! Traceability lives next to it in `traceability.json` as
//! `{key: {unit, function, lines}}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::requirements::types::{Location, Requirement, RequirementsCollection};

#[derive(Debug, Deserialize)]
struct StoredRequirement {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Traceability {
    #[serde(default)]
    unit: String,
    #[serde(default)]
    function: String,
    #[serde(default)]
    lines: Option<Vec<u32>>,
}

/// Load a collection from a gateway directory.
pub fn load_gateway(gateway_dir: &Path) -> Result<RequirementsCollection> {
    let requirements_path = requirements_json_path(gateway_dir)?;
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&requirements_path)?)?;

    // Older harness versions nest everything under a "requirements" object.
    let groups = match raw.get("requirements") {
        Some(inner) => inner.clone(),
        None => raw,
    };
    let groups: BTreeMap<String, BTreeMap<String, StoredRequirement>> =
        serde_json::from_value(groups)?;

    let traceability = load_traceability(gateway_dir)?;

    let mut collection = RequirementsCollection::new();
    for (_group, requirements) in groups {
        for (key, stored) in requirements {
            let location = match traceability.as_ref().and_then(|t| t.get(&key)) {
                Some(trace) => {
                    let mut location = Location::new(trace.unit.clone(), trace.function.clone());
                    location.lines = trace.lines.clone();
                    location
                }
                None => {
                    warn!("no traceability info for requirement '{key}'");
                    Location::new("", "")
                }
            };
            collection.push(Requirement::new(
                key,
                stored.id,
                stored.title,
                stored.description,
                location,
            ))?;
        }
    }
    Ok(collection)
}

fn requirements_json_path(gateway_dir: &Path) -> Result<PathBuf> {
    let dir = gateway_dir.join("requirements_gateway");
    let current = dir.join("requirements.json");
    if current.is_file() {
        return Ok(current);
    }
    let legacy = dir.join("repository.json");
    if legacy.is_file() {
        warn!(
            "gateway contains repository.json instead of requirements.json; \
             newer harness versions write requirements.json"
        );
        return Ok(legacy);
    }
    Err(Error::Requirements(format!(
        "no requirements file found under {}",
        dir.display()
    )))
}

fn load_traceability(gateway_dir: &Path) -> Result<Option<BTreeMap<String, Traceability>>> {
    let path = gateway_dir
        .join("requirements_gateway")
        .join("traceability.json");
    if !path.is_file() {
        return Ok(None);
    }
    let data = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_gateway(dir: &Path, requirements_name: &str, with_traceability: bool) {
        let gateway = dir.join("requirements_gateway");
        std::fs::create_dir_all(&gateway).unwrap();
        std::fs::write(
            gateway.join(requirements_name),
            r#"{
                "group1": {
                    "r1": {"id": "REQ-1", "title": "clamp", "description": "clamps input"},
                    "r2": {"id": "REQ-2", "title": "scale", "description": "scales input"}
                }
            }"#,
        )
        .unwrap();
        if with_traceability {
            std::fs::write(
                gateway.join("traceability.json"),
                r#"{
                    "r1": {"unit": "sensor", "function": "clamp_value", "lines": [3, 4]},
                    "r2": {"unit": "sensor", "function": "scale_value"}
                }"#,
            )
            .unwrap();
        }
    }

    #[test]
    fn loads_requirements_with_traceability() {
        let dir = tempfile::tempdir().unwrap();
        write_gateway(dir.path(), "requirements.json", true);

        let collection = load_gateway(dir.path()).unwrap();
        assert_eq!(collection.len(), 2);
        let r1 = collection.get("r1").unwrap();
        assert_eq!(r1.id, "REQ-1");
        assert_eq!(r1.location.unit, "sensor");
        assert_eq!(r1.location.lines, Some(vec![3, 4]));
        assert_eq!(collection.get("r2").unwrap().location.lines, None);
    }

    #[test]
    fn accepts_legacy_repository_json() {
        let dir = tempfile::tempdir().unwrap();
        write_gateway(dir.path(), "repository.json", false);

        let collection = load_gateway(dir.path()).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("r1").unwrap().location.unit, "");
    }

    #[test]
    fn missing_gateway_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_gateway(dir.path()).is_err());
    }
}
