//! CF-005: Unit, verifier and port contracts.
//!
//! A unit owns its descriptor and lives for the whole process. Verifiers are
//! injectable predicates attached to input properties. Ports are collaborator
//! objects passed by value through a context (e.g. a document repository).

use super::types::{Inputs, Outputs, UnitDescriptor, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A registered piece of logic with declared input/output contracts.
pub trait Unit: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;

    /// Unit-specific check, run after structural and verifier validation pass.
    fn validate(&self, _inputs: &Inputs) -> Result<(), String> {
        Ok(())
    }

    fn execute(&self, inputs: &Inputs) -> anyhow::Result<Outputs>;
}

pub type UnitRef = Arc<dyn Unit>;

/// Predicate validating one input value beyond its type.
///
/// `Err` is treated the same as `Ok(false)`, with the message kept as the reason.
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    fn verify(&self, key: &str, value: &Value, inputs: &Inputs) -> Result<bool, String>;
}

pub type VerifierRef = Arc<dyn Verifier>;

impl fmt::Debug for dyn Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verifier({})", self.name())
    }
}

/// Collaborator interface carried as a context value.
pub trait Port: Send + Sync + fmt::Debug {
    /// Interface names this port implements.
    fn interfaces(&self) -> &[&str];

    fn as_any(&self) -> &dyn Any;

    fn implements(&self, interface: &str) -> bool {
        self.interfaces().contains(&interface)
    }
}

type UnitFn = dyn Fn(&Inputs) -> anyhow::Result<Outputs> + Send + Sync;

/// A unit backed by a closure.
pub struct FnUnit {
    descriptor: UnitDescriptor,
    func: Box<UnitFn>,
}

impl FnUnit {
    pub fn new<F>(descriptor: UnitDescriptor, func: F) -> Self
    where
        F: Fn(&Inputs) -> anyhow::Result<Outputs> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            func: Box::new(func),
        }
    }
}

impl Unit for FnUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn execute(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        (self.func)(inputs)
    }
}

impl fmt::Debug for FnUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUnit")
            .field("id", &self.descriptor.id)
            .finish()
    }
}

type VerifyFn = dyn Fn(&str, &Value, &Inputs) -> Result<bool, String> + Send + Sync;

/// A verifier backed by a closure.
pub struct FnVerifier {
    name: String,
    func: Box<VerifyFn>,
}

impl FnVerifier {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<F>(name: impl Into<String>, func: F) -> VerifierRef
    where
        F: Fn(&str, &Value, &Inputs) -> Result<bool, String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            func: Box::new(func),
        })
    }
}

impl Verifier for FnVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, key: &str, value: &Value, inputs: &Inputs) -> Result<bool, String> {
        (self.func)(key, value, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PropertySpec, TypeTag};

    #[test]
    fn test_cf005_fn_unit_executes() {
        let unit = FnUnit::new(
            UnitDescriptor::new("org.demo.echo", "1.0.0")
                .with_input(PropertySpec::required("msg", TypeTag::String))
                .with_output("echo"),
            |inputs| {
                let mut out = Outputs::new();
                out.insert("echo".into(), inputs["msg"].clone());
                Ok(out)
            },
        );
        let mut inputs = Inputs::new();
        inputs.insert("msg".into(), Value::from("hi"));
        let out = unit.execute(&inputs).unwrap();
        assert_eq!(out["echo"], Value::from("hi"));
        assert!(unit.validate(&inputs).is_ok());
        assert_eq!(unit.descriptor().id, "org.demo.echo");
    }

    #[test]
    fn test_cf005_fn_verifier() {
        let v = FnVerifier::new("starts_with_t", |_, value, _| {
            Ok(value.as_str().is_some_and(|s| s.starts_with('t')))
        });
        let inputs = Inputs::new();
        assert_eq!(v.name(), "starts_with_t");
        assert_eq!(v.verify("k", &Value::from("t1"), &inputs), Ok(true));
        assert_eq!(v.verify("k", &Value::from("x"), &inputs), Ok(false));
        assert_eq!(format!("{:?}", v), "Verifier(starts_with_t)");
    }

    #[test]
    fn test_cf005_port_implements() {
        #[derive(Debug)]
        struct Mailbox;
        impl Port for Mailbox {
            fn interfaces(&self) -> &[&str] {
                &["mailbox", "readable"]
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
        let m = Mailbox;
        assert!(m.implements("mailbox"));
        assert!(m.implements("readable"));
        assert!(!m.implements("document-repository"));
    }
}
