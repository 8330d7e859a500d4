//! CF-021: Shell-command units declared in a manifest.
//!
//! Inputs reach the script as `CAPFORGE_IN_<KEY>` variables plus the whole
//! input object as JSON in `CAPFORGE_INPUTS`. Stdout that is a JSON object
//! becomes the outputs; with exactly one declared output, trimmed stdout is
//! bound to it instead.

use crate::core::types::{
    values_to_json, Inputs, Outputs, PropertySpec, UnitDescriptor, UnitSpec, Value,
};
use crate::core::unit::Unit;
use crate::transport::{self, ScriptEnv};
use anyhow::{bail, Context as _};
use tracing::debug;

use super::verifiers;

/// A unit that runs a bash script.
#[derive(Debug)]
pub struct CommandUnit {
    descriptor: UnitDescriptor,
    script: String,
}

impl CommandUnit {
    pub fn new(descriptor: UnitDescriptor, script: impl Into<String>) -> Self {
        Self {
            descriptor,
            script: script.into(),
        }
    }

    /// Build from a manifest entry, resolving verifier names.
    pub fn from_spec(id: &str, spec: &UnitSpec) -> Result<Self, String> {
        let script = spec
            .run
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| format!("unit '{}' has no run script", id))?;

        let mut descriptor = UnitDescriptor::new(id, spec.version.clone()).with_kind(spec.kind);
        if let Some(name) = &spec.name {
            descriptor = descriptor.with_name(name.clone());
        }
        if let Some(description) = &spec.description {
            descriptor = descriptor.with_description(description.clone());
        }
        for tag in &spec.tags {
            descriptor = descriptor.with_tag(tag.clone());
        }
        for (key, input) in &spec.inputs {
            let mut property = if input.required {
                PropertySpec::required(key.clone(), input.type_tag.clone())
            } else {
                PropertySpec::optional(key.clone(), input.type_tag.clone())
            };
            if let Some(description) = &input.description {
                property = property.with_description(description.clone());
            }
            for name in &input.verify {
                let verifier = verifiers::resolve(name)
                    .map_err(|e| format!("unit '{}' input '{}': {}", id, key, e))?;
                property = property.with_verifier(verifier);
            }
            descriptor = descriptor.with_input(property);
        }
        for key in &spec.outputs {
            descriptor = descriptor.with_output(key.clone());
        }
        for raise in &spec.raises {
            descriptor = descriptor.with_raise(raise.code.clone(), raise.description.clone());
        }
        for request in &spec.requests {
            descriptor = descriptor.with_request(request.id.clone(), request.condition.as_deref());
        }

        Ok(Self::new(descriptor, script))
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    fn environment(&self, inputs: &Inputs) -> Result<ScriptEnv, serde_json::Error> {
        let mut env = ScriptEnv::new();
        env.set("CAPFORGE_UNIT", self.descriptor.id.clone());
        for (key, value) in inputs {
            let rendered = match value.to_json() {
                serde_json::Value::String(s) => s,
                other => serde_json::to_string(&other)?,
            };
            env.set(env_var_name(key), rendered);
        }
        env.set("CAPFORGE_INPUTS", serde_json::to_string(&values_to_json(inputs))?);
        Ok(env)
    }

    fn parse_outputs(&self, stdout: &str) -> anyhow::Result<Outputs> {
        let trimmed = stdout.trim();
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
            return Ok(map.into_iter().map(|(k, v)| (k, Value::Data(v))).collect());
        }

        let declared = &self.descriptor.outputs;
        match declared.len() {
            0 => Ok(Outputs::new()),
            1 => {
                let mut outputs = Outputs::new();
                if let Some(key) = declared.first() {
                    outputs.insert(key.clone(), Value::from(trimmed));
                }
                Ok(outputs)
            }
            n => bail!(
                "unit declares {} outputs but stdout is not a JSON object",
                n
            ),
        }
    }
}

/// `CAPFORGE_IN_` plus the key upper-cased, non-alphanumerics as `_`.
pub fn env_var_name(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CAPFORGE_IN_{}", suffix)
}

impl Unit for CommandUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn execute(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let env = self
            .environment(inputs)
            .context("failed to encode inputs")?;
        debug!(unit = %self.descriptor.id, "running command unit");
        let out = transport::exec_local(&self.script, &env).map_err(anyhow::Error::msg)?;
        if !out.success() {
            bail!("exit code {}: {}", out.exit_code, out.stderr_tail());
        }
        self.parse_outputs(&out.stdout)
    }
}
