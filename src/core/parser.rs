//! CF-002: Manifest parsing and validation.
//!
//! Parses capforge.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Unit ids are dotted paths with no empty segments
//! - Verifier names resolve in the built-in catalog
//! - Shell units cannot take port-typed inputs
//! - Requested providers exist
//! - Every unit has a `run` script

use super::types::*;
use crate::units::verifiers;
use std::collections::HashSet;
use std::path::Path;

/// A manifest problem found by [`validate_config`].
#[derive(Debug, Clone)]
pub struct ManifestError {
    pub message: String,
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a capforge.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<CapforgeConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a capforge.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<CapforgeConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn is_dotted_path(id: &str) -> bool {
    !id.is_empty()
        && id
            .split('.')
            .all(|seg| !seg.is_empty() && !seg.chars().any(char::is_whitespace))
}

/// Validate a parsed manifest. Returns every problem found (empty = valid).
pub fn validate_config(config: &CapforgeConfig) -> Vec<ManifestError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ManifestError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }

    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    for (id, unit) in &config.units {
        if !is_dotted_path(id) {
            push(format!("unit id '{}' is not a dotted path", id));
        }

        if unit.run.as_deref().is_none_or(|s| s.trim().is_empty()) {
            push(format!("unit '{}' has no run script", id));
        }

        for (key, input) in &unit.inputs {
            if key.trim().is_empty() {
                push(format!("unit '{}' declares an input with an empty name", id));
            }
            if let TypeTag::Port(iface) = &input.type_tag {
                push(format!(
                    "unit '{}' input '{}' has port type '{}', which shell units cannot receive",
                    id, key, iface
                ));
            }
            for name in &input.verify {
                if let Err(e) = verifiers::resolve(name) {
                    push(format!("unit '{}' input '{}': {}", id, key, e));
                }
            }
            if input.required && unit.outputs.iter().any(|o| o == key) {
                push(format!("unit '{}' requires its own output '{}'", id, key));
            }
        }

        let mut seen = HashSet::new();
        for key in &unit.outputs {
            if key.trim().is_empty() {
                push(format!("unit '{}' declares an empty output key", id));
            } else if !seen.insert(key.as_str()) {
                push(format!("unit '{}' declares output '{}' twice", id, key));
            }
        }

        for request in &unit.requests {
            if request.id == *id {
                push(format!("unit '{}' requests itself", id));
            } else if !config.units.contains_key(&request.id) {
                push(format!(
                    "unit '{}' requests unknown unit '{}'",
                    id, request.id
                ));
            }
        }
    }

    errors
}
