//! CF-008: Run context — the append-only key/value store threaded through a plan.

use super::error::RunError;
use super::types::{BindingPolicy, Inputs, Outputs, UnitDescriptor, Value};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::warn;

/// Keys bound and discarded by one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub bound: Vec<String>,
    pub discarded: Vec<String>,
}

/// Accumulating key/value store. A key, once bound, keeps its first value.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: IndexMap<String, Value>,
    policy: BindingPolicy,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: BindingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Seed a host-supplied value. Later seeds of the same key replace earlier ones.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Whether `key` is bound to a truthy value.
    pub fn is_truthy(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(Value::is_truthy)
    }

    /// Inputs for `descriptor`: every declared property currently bound.
    pub fn slice(&self, descriptor: &UnitDescriptor) -> Inputs {
        descriptor
            .inputs
            .keys()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Fold a unit's outputs in, honouring the binding policy.
    pub fn merge(&mut self, outputs: Outputs, writer: &str) -> Result<MergeOutcome, RunError> {
        let mut outcome = MergeOutcome::default();
        for (key, value) in outputs {
            if self.values.contains_key(&key) {
                if self.policy == BindingPolicy::Strict {
                    return Err(RunError::DuplicateBinding {
                        key,
                        unit_id: writer.to_string(),
                    });
                }
                warn!(key = %key, unit = %writer, "context key already bound; keeping first value");
                outcome.discarded.push(key);
                continue;
            }
            self.values.insert(key.clone(), value);
            outcome.bound.push(key);
        }
        Ok(outcome)
    }

    pub fn into_values(self) -> IndexMap<String, Value> {
        self.values
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}
