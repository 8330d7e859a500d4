//! CF-007: Failure taxonomy for planning and execution.
//!
//! Infeasible plans are not errors; they come back as
//! [`ExecutionPlan::Infeasible`](super::types::ExecutionPlan). Everything here
//! stops the caller.

use super::types::TypeTag;
use thiserror::Error;

/// Planning errors that prevent a graph from being built at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("unit '{0}' not found in registry")]
    UnitNotFound(String),
}

/// Input-contract violations detected before a unit is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required input: {property}")]
    MissingRequiredInput { property: String },

    #[error("input {property} has type {actual}, expected {expected}")]
    TypeMismatch {
        property: String,
        expected: TypeTag,
        actual: String,
    },

    #[error("input {property} failed verification {verifier}{}", reason_suffix(.reason))]
    VerificationFailed {
        property: String,
        verifier: String,
        reason: Option<String>,
    },

    #[error("unit '{unit_id}' rejected its inputs: {reason}")]
    SelfCheckFailed { unit_id: String, reason: String },
}

impl ValidationError {
    pub fn missing(property: impl Into<String>) -> Self {
        Self::MissingRequiredInput {
            property: property.into(),
        }
    }

    pub fn verification(
        property: impl Into<String>,
        verifier: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self::VerificationFailed {
            property: property.into(),
            verifier: verifier.into(),
            reason,
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default()
}

/// Failure of a single `Executor::run` call.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("unit '{unit_id}' input validation failed: {source}")]
    Invalid {
        unit_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("unit '{unit_id}' failed: {source:#}")]
    UnitExecution {
        unit_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ExecError {
    pub fn unit_id(&self) -> &str {
        match self {
            Self::Invalid { unit_id, .. } | Self::UnitExecution { unit_id, .. } => unit_id,
        }
    }

    /// The validation failure, if the unit never ran.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Invalid { source, .. } => Some(source),
            Self::UnitExecution { .. } => None,
        }
    }
}

/// Failure that aborts a plan run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("unit '{0}' not found in registry")]
    UnitNotFound(String),

    #[error("step '{unit_id}' failed after {completed} completed step(s): {source}")]
    Step {
        unit_id: String,
        completed: usize,
        #[source]
        source: ExecError,
    },

    #[error("unit '{unit_id}' rebinds context key '{key}'")]
    DuplicateBinding { key: String, unit_id: String },
}
