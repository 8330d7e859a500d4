//! CF-020: Built-in verifier catalog for manifest inputs.
//!
//! Names: `non_empty`, `path_exists`, `readable`, `name_pattern`,
//! `pattern:<regex>`, `glob:<pattern>`.

use crate::core::types::{Inputs, Value};
use crate::core::unit::{Verifier, VerifierRef};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// Resolve a verifier by its catalog name.
pub fn resolve(name: &str) -> Result<VerifierRef, String> {
    if let Some(expr) = name.strip_prefix("pattern:") {
        return Ok(Arc::new(PatternMatch::new(expr)?));
    }
    if let Some(pattern) = name.strip_prefix("glob:") {
        return Ok(Arc::new(GlobMatch::new(pattern)?));
    }
    match name {
        "non_empty" => Ok(Arc::new(NonEmpty)),
        "path_exists" => Ok(Arc::new(PathExists)),
        "readable" => Ok(Arc::new(Readable)),
        "name_pattern" => Ok(Arc::new(NamePattern)),
        other => Err(format!("unknown verifier '{}'", other)),
    }
}

fn expect_str<'v>(key: &str, value: &'v Value) -> Result<&'v str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{} must be a string, got {}", key, value.type_name()))
}

/// Strings, arrays and objects must be non-empty; null never passes.
#[derive(Debug)]
pub struct NonEmpty;

impl Verifier for NonEmpty {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn verify(&self, _key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        Ok(match value.as_data() {
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(serde_json::Value::Null) => false,
            _ => true,
        })
    }
}

#[derive(Debug)]
pub struct PathExists;

impl Verifier for PathExists {
    fn name(&self) -> &str {
        "path_exists"
    }

    fn verify(&self, key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        let path = expect_str(key, value)?;
        if Path::new(path).exists() {
            Ok(true)
        } else {
            Err(format!("{} does not exist", path))
        }
    }
}

/// File can be opened, or directory listed.
#[derive(Debug)]
pub struct Readable;

impl Verifier for Readable {
    fn name(&self) -> &str {
        "readable"
    }

    fn verify(&self, key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        let path = Path::new(expect_str(key, value)?);
        let opened = if path.is_dir() {
            std::fs::read_dir(path).map(|_| ())
        } else {
            std::fs::File::open(path).map(|_| ())
        };
        opened
            .map(|()| true)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))
    }
}

/// Value must match a regular expression (unanchored).
#[derive(Debug)]
pub struct PatternMatch {
    name: String,
    regex: Regex,
}

impl PatternMatch {
    pub fn new(expr: &str) -> Result<Self, String> {
        let regex = Regex::new(expr).map_err(|e| format!("invalid pattern '{}': {}", expr, e))?;
        Ok(Self {
            name: format!("pattern:{}", expr),
            regex,
        })
    }
}

impl Verifier for PatternMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        Ok(self.regex.is_match(expect_str(key, value)?))
    }
}

/// Value must match a shell glob.
#[derive(Debug)]
pub struct GlobMatch {
    name: String,
    pattern: glob::Pattern,
}

impl GlobMatch {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| format!("invalid glob '{}': {}", pattern, e))?;
        Ok(Self {
            name: format!("glob:{}", pattern),
            pattern: compiled,
        })
    }
}

impl Verifier for GlobMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        Ok(self.pattern.matches(expect_str(key, value)?))
    }
}

/// Value is itself a usable name filter: a glob, or a regex prefixed `regex:`.
#[derive(Debug)]
pub struct NamePattern;

impl Verifier for NamePattern {
    fn name(&self) -> &str {
        "name_pattern"
    }

    fn verify(&self, key: &str, value: &Value, _inputs: &Inputs) -> Result<bool, String> {
        let raw = expect_str(key, value)?;
        match raw.strip_prefix("regex:") {
            Some(expr) => Regex::new(expr).map(|_| true).map_err(|e| e.to_string()),
            None => glob::Pattern::new(raw).map(|_| true).map_err(|e| e.to_string()),
        }
    }
}
