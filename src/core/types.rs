//! CF-001: Descriptor model, runtime values, plans, manifest schema and run events.
//!
//! Descriptors are built once when a unit is registered and never mutated.
//! Manifest types derive Serialize/Deserialize for YAML roundtripping.

use super::unit::{Port, VerifierRef};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Type tags
// ============================================================================

/// Closed set of semantic types an input property can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeTag {
    String,
    Integer,
    Boolean,
    Array,
    Object,
    /// Collaborator interface (e.g. `port:document-repository`).
    Port(String),
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Boolean => write!(f, "boolean"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
            Self::Port(iface) => write!(f, "port:{}", iface),
        }
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "boolean" => Ok(Self::Boolean),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => match other.strip_prefix("port:") {
                Some(iface) if !iface.is_empty() => Ok(Self::Port(iface.to_string())),
                _ => Err(format!("unknown type tag: {}", other)),
            },
        }
    }
}

impl TryFrom<String> for TypeTag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.to_string()
    }
}

// ============================================================================
// Descriptor model
// ============================================================================

/// One declared input of a unit.
#[derive(Debug, Clone, Serialize)]
pub struct PropertySpec {
    /// Property name (the map key in the owning schema)
    #[serde(skip)]
    pub name: String,

    #[serde(rename = "type")]
    pub type_tag: TypeTag,

    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Evaluated in declaration order
    #[serde(rename = "verify", serialize_with = "serialize_verifiers")]
    pub verifiers: Vec<VerifierRef>,
}

impl PropertySpec {
    pub fn required(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            required: true,
            description: None,
            verifiers: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            required: false,
            ..Self::required(name, type_tag)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_verifier(mut self, verifier: VerifierRef) -> Self {
        self.verifiers.push(verifier);
        self
    }
}

fn serialize_verifiers<S: Serializer>(
    verifiers: &[VerifierRef],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(verifiers.iter().map(|v| v.name().to_string()))
}

/// Unit flavour. Capabilities query, actions transform or create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[default]
    Capability,
    Action,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability => write!(f, "capability"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// An error code a unit may raise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDecl {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// A provider that must run before the declaring unit, for its side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Provider unit id
    pub id: String,

    /// Context key that must be bound to a truthy value; absent = always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Static metadata for a unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitDescriptor {
    /// Dotted-path identifier, globally unique
    pub id: String,

    pub version: String,

    #[serde(rename = "type")]
    pub kind: UnitKind,

    pub name: String,

    pub description: String,

    pub tags: Vec<String>,

    /// Input schema, keyed by property name
    pub inputs: IndexMap<String, PropertySpec>,

    /// Output keys
    pub outputs: IndexSet<String>,

    /// Declared error codes
    pub raises: Vec<ErrorDecl>,

    /// Direct provider requests
    pub requests: Vec<ProviderRequest>,
}

impl UnitDescriptor {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        let name = id.rsplit('.').next().unwrap_or_default().to_string();
        Self {
            id,
            version: version.into(),
            kind: UnitKind::Capability,
            name,
            description: String::new(),
            tags: Vec::new(),
            inputs: IndexMap::new(),
            outputs: IndexSet::new(),
            raises: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: UnitKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add an input property. A later property with the same name replaces the earlier one.
    pub fn with_input(mut self, property: PropertySpec) -> Self {
        self.inputs.insert(property.name.clone(), property);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.outputs.insert(key.into());
        self
    }

    pub fn with_raise(mut self, code: impl Into<String>, description: impl Into<String>) -> Self {
        self.raises.push(ErrorDecl {
            code: code.into(),
            description: description.into(),
        });
        self
    }

    pub fn with_request(mut self, id: impl Into<String>, condition: Option<&str>) -> Self {
        self.requests.push(ProviderRequest {
            id: id.into(),
            condition: condition.map(str::to_string),
        });
        self
    }

    /// Properties marked `required`, in declaration order.
    pub fn required_inputs(&self) -> impl Iterator<Item = &PropertySpec> {
        self.inputs.values().filter(|p| p.required)
    }

    /// Whether this unit lists `key` among its outputs.
    pub fn produces(&self, key: &str) -> bool {
        self.outputs.contains(key)
    }
}

// ============================================================================
// Runtime values
// ============================================================================

/// A value bound in a context: plain data or a collaborator port.
#[derive(Debug, Clone)]
pub enum Value {
    Data(serde_json::Value),
    Port(Arc<dyn Port>),
}

impl Value {
    /// Short type name used in mismatch diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Self::Data(serde_json::Value::Null) => "null".to_string(),
            Self::Data(serde_json::Value::Bool(_)) => "boolean".to_string(),
            Self::Data(serde_json::Value::Number(n)) if n.is_i64() || n.is_u64() => {
                "integer".to_string()
            }
            Self::Data(serde_json::Value::Number(_)) => "number".to_string(),
            Self::Data(serde_json::Value::String(_)) => "string".to_string(),
            Self::Data(serde_json::Value::Array(_)) => "array".to_string(),
            Self::Data(serde_json::Value::Object(_)) => "object".to_string(),
            Self::Port(port) => format!("port:{}", port.interfaces().join("+")),
        }
    }

    /// Whether this value satisfies a declared type tag.
    pub fn matches(&self, tag: &TypeTag) -> bool {
        match (tag, self) {
            (TypeTag::String, Self::Data(v)) => v.is_string(),
            (TypeTag::Integer, Self::Data(v)) => v.is_i64() || v.is_u64(),
            (TypeTag::Boolean, Self::Data(v)) => v.is_boolean(),
            (TypeTag::Array, Self::Data(v)) => v.is_array(),
            (TypeTag::Object, Self::Data(v)) => v.is_object(),
            (TypeTag::Port(iface), Self::Port(port)) => port.implements(iface),
            _ => false,
        }
    }

    /// Truthiness used by provider request conditions.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Data(serde_json::Value::Null) => false,
            Self::Data(serde_json::Value::Bool(b)) => *b,
            Self::Data(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Self::Data(serde_json::Value::String(s)) => !s.is_empty(),
            Self::Data(serde_json::Value::Array(a)) => !a.is_empty(),
            Self::Data(serde_json::Value::Object(o)) => !o.is_empty(),
            Self::Port(_) => true,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(v) => Some(v),
            Self::Port(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(|v| v.as_str())
    }

    pub fn as_port(&self) -> Option<&Arc<dyn Port>> {
        match self {
            Self::Port(p) => Some(p),
            Self::Data(_) => None,
        }
    }

    /// Downcast a port value to its concrete type.
    pub fn port_as<T: 'static>(&self) -> Option<&T> {
        self.as_port().and_then(|p| p.as_any().downcast_ref::<T>())
    }

    /// JSON rendering; ports render as `"<port:iface>"`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Data(v) => v.clone(),
            Self::Port(_) => serde_json::Value::String(format!("<{}>", self.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Port(a), Self::Port(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Data(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Data(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Data(serde_json::Value::String(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Data(serde_json::Value::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Data(serde_json::Value::Bool(b))
    }
}

impl From<Arc<dyn Port>> for Value {
    fn from(port: Arc<dyn Port>) -> Self {
        Self::Port(port)
    }
}

/// Inputs handed to a unit.
pub type Inputs = IndexMap<String, Value>;

/// Outputs returned by a unit.
pub type Outputs = IndexMap<String, Value>;

/// Render a map of values as a JSON object.
pub fn values_to_json(values: &IndexMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

// ============================================================================
// Plan
// ============================================================================

/// A linearized plan ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedPlan {
    /// Requested unit
    pub target: String,

    /// Unit ids, providers before consumers
    pub steps: Vec<String>,

    /// Kahn layers; units in one layer share no edge
    pub levels: Vec<Vec<String>>,
}

/// Why no plan could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Infeasibility {
    /// Required keys with neither a context value nor a provider
    Missing(BTreeSet<String>),
    /// The provider graph cannot be linearized
    Cyclic { members: Vec<String> },
}

impl fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(keys) => write!(
                f,
                "unresolved dependencies: {}",
                keys.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            Self::Cyclic { members } => {
                write!(f, "dependency cycle detected involving: {}", members.join(", "))
            }
        }
    }
}

/// Outcome of planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    Ordered(OrderedPlan),
    Infeasible(Infeasibility),
}

impl ExecutionPlan {
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Ordered(_))
    }

    pub fn steps(&self) -> Option<&[String]> {
        match self {
            Self::Ordered(plan) => Some(&plan.steps),
            Self::Infeasible(_) => None,
        }
    }

    pub fn missing(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Infeasible(Infeasibility::Missing(keys)) => Some(keys),
            _ => None,
        }
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, Self::Infeasible(Infeasibility::Cyclic { .. }))
    }
}

// ============================================================================
// Step state machine
// ============================================================================

/// Lifecycle of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Validating,
    Valid,
    Invalid,
    Executing,
    Succeeded,
    Failed,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Advance to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(self, next: StepState) -> Result<StepState, String> {
        let allowed = matches!(
            (self, next),
            (Self::Pending, Self::Validating)
                | (Self::Validating, Self::Valid)
                | (Self::Validating, Self::Invalid)
                | (Self::Valid, Self::Executing)
                | (Self::Invalid, Self::Failed)
                | (Self::Executing, Self::Succeeded)
                | (Self::Executing, Self::Failed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(format!("illegal step transition {} -> {}", self, next))
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Valid => write!(f, "VALID"),
            Self::Invalid => write!(f, "INVALID"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Manifest (capforge.yaml)
// ============================================================================

/// Root manifest: the unit catalog a host registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapforgeConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable catalog name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,

    /// Unit declarations (order-preserving; order is the provider tie-break)
    #[serde(default)]
    pub units: IndexMap<String, UnitSpec>,
}

/// A unit declared in the manifest and run as a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    #[serde(default)]
    pub kind: UnitKind,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub raises: Vec<ErrorDecl>,

    #[serde(default)]
    pub requests: Vec<ProviderRequest>,

    /// Shell script body
    #[serde(default)]
    pub run: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A declared input in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub type_tag: TypeTag,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Verifier names from the built-in catalog
    #[serde(default)]
    pub verify: Vec<String>,
}

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// What happens when a unit writes an already-bound key
    #[serde(default)]
    pub bindings: BindingPolicy,

    /// Append run events to the journal
    #[serde(default = "default_true")]
    pub journal: bool,

    /// Run independent units of a plan level concurrently
    #[serde(default)]
    pub parallel: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            bindings: BindingPolicy::default(),
            journal: true,
            parallel: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Context write discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPolicy {
    /// Keep the first value; later writes are discarded
    #[default]
    FirstWins,
    /// Any rebinding aborts the run
    Strict,
}

// ============================================================================
// Run journal events
// ============================================================================

/// Run event for the JSONL journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        target: String,
        plan_hash: String,
        steps: usize,
    },
    StepStarted {
        run_id: String,
        unit: String,
        version: String,
    },
    StepSucceeded {
        run_id: String,
        unit: String,
        duration_seconds: f64,
        outputs: Vec<String>,
    },
    StepFailed {
        run_id: String,
        unit: String,
        state: StepState,
        error: String,
    },
    RunCompleted {
        run_id: String,
        target: String,
        succeeded: u32,
        failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Tests
// ============================================================================
