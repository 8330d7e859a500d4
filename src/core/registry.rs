//! CF-006: Unit registry — exact lookup and lookup by available attributes.
//!
//! Registration order is preserved and is the provider tie-break the
//! resolver relies on. Re-registering an id replaces the unit in place,
//! keeping its original slot.

use super::types::UnitKind;
use super::unit::{Unit, UnitRef};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Index from unit id to unit.
#[derive(Clone, Default)]
pub struct Registry {
    units: IndexMap<String, UnitRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the unit keyed by its descriptor id.
    /// Units with an empty id are ignored; returns whether the unit was stored.
    pub fn register(&mut self, unit: UnitRef) -> bool {
        let id = unit.descriptor().id.clone();
        if id.trim().is_empty() {
            warn!("ignoring unit registration with empty id");
            return false;
        }
        if self.units.insert(id.clone(), unit).is_some() {
            debug!(unit = %id, "replaced existing registration");
        }
        true
    }

    pub fn register_unit<U: Unit + 'static>(&mut self, unit: U) -> bool {
        self.register(Arc::new(unit))
    }

    /// Register every unit; returns how many were stored.
    pub fn register_many<I>(&mut self, units: I) -> usize
    where
        I: IntoIterator<Item = UnitRef>,
    {
        units.into_iter().filter(|u| self.register(u.clone())).count()
    }

    pub fn get(&self, id: &str) -> Option<&UnitRef> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UnitRef)> {
        self.units.iter().map(|(id, u)| (id.as_str(), u))
    }

    /// Ids of every unit declaring `key` as an output, in registration order.
    pub fn providers_of(&self, key: &str) -> Vec<&str> {
        self.iter()
            .filter(|(_, u)| u.descriptor().produces(key))
            .map(|(id, _)| id)
            .collect()
    }

    /// Units that can run on `available` keys alone.
    ///
    /// A unit matches when at least one of its inputs is available and every
    /// required input is available. Units without inputs never match.
    pub fn by_attributes(&self, available: &BTreeSet<String>) -> IndexMap<String, UnitRef> {
        self.iter()
            .filter(|(_, u)| {
                let inputs = &u.descriptor().inputs;
                !inputs.is_empty()
                    && inputs.keys().any(|k| available.contains(k))
                    && inputs
                        .values()
                        .filter(|p| p.required)
                        .all(|p| available.contains(&p.name))
            })
            .map(|(id, u)| (id.to_string(), u.clone()))
            .collect()
    }

    /// [`Registry::by_attributes`] restricted to one unit kind.
    pub fn by_attributes_of_kind(
        &self,
        available: &BTreeSet<String>,
        kind: UnitKind,
    ) -> IndexMap<String, UnitRef> {
        let mut matched = self.by_attributes(available);
        matched.retain(|_, u| u.descriptor().kind == kind);
        matched
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.units.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outputs, PropertySpec, TypeTag, UnitDescriptor};
    use crate::core::unit::FnUnit;

    fn unit(descriptor: UnitDescriptor) -> UnitRef {
        Arc::new(FnUnit::new(descriptor, |_| Ok(Outputs::new())))
    }

    fn keys(ks: &[&str]) -> BTreeSet<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_cf006_register_and_get() {
        let mut reg = Registry::new();
        assert!(reg.register(unit(UnitDescriptor::new("org.demo.a", "1"))));
        assert!(reg.contains("org.demo.a"));
        assert_eq!(reg.get("org.demo.a").unwrap().descriptor().version, "1");
        assert!(reg.get("org.demo.b").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_cf006_empty_id_ignored() {
        let mut reg = Registry::new();
        assert!(!reg.register(unit(UnitDescriptor::new("", "1"))));
        assert!(!reg.register(unit(UnitDescriptor::new("   ", "1"))));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_cf006_duplicate_last_wins_keeps_slot() {
        let mut reg = Registry::new();
        reg.register(unit(UnitDescriptor::new("a", "1")));
        reg.register(unit(UnitDescriptor::new("b", "1")));
        reg.register(unit(UnitDescriptor::new("a", "2")));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("a").unwrap().descriptor().version, "2");
        let ids: Vec<_> = reg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_cf006_register_many_counts_stored() {
        let mut reg = Registry::new();
        let stored = reg.register_many(vec![
            unit(UnitDescriptor::new("a", "1")),
            unit(UnitDescriptor::new("", "1")),
            unit(UnitDescriptor::new("b", "1")),
        ]);
        assert_eq!(stored, 2);
    }

    #[test]
    fn test_cf006_providers_in_registration_order() {
        let mut reg = Registry::new();
        reg.register(unit(UnitDescriptor::new("z.second", "1").with_output("token")));
        reg.register(unit(UnitDescriptor::new("a.first", "1").with_output("other")));
        reg.register(unit(UnitDescriptor::new("m.third", "1").with_output("token")));
        assert_eq!(reg.providers_of("token"), vec!["z.second", "m.third"]);
        assert!(reg.providers_of("nothing").is_empty());
    }

    #[test]
    fn test_cf006_by_attributes_requires_all_required() {
        let mut reg = Registry::new();
        reg.register(unit(
            UnitDescriptor::new("needs_y", "1")
                .with_input(PropertySpec::optional("x", TypeTag::String))
                .with_input(PropertySpec::required("y", TypeTag::String)),
        ));
        reg.register(unit(
            UnitDescriptor::new("x_only", "1").with_input(PropertySpec::required("x", TypeTag::String)),
        ));
        let matched = reg.by_attributes(&keys(&["x"]));
        assert!(!matched.contains_key("needs_y"));
        assert!(matched.contains_key("x_only"));

        let matched = reg.by_attributes(&keys(&["x", "y"]));
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_cf006_by_attributes_relevance_filter() {
        let mut reg = Registry::new();
        reg.register(unit(
            UnitDescriptor::new("optional_only", "1")
                .with_input(PropertySpec::optional("limit", TypeTag::Integer)),
        ));
        reg.register(unit(UnitDescriptor::new("no_inputs", "1").with_output("token")));

        // All required inputs trivially satisfied, but nothing relevant supplied.
        assert!(reg.by_attributes(&keys(&["repository"])).is_empty());
        let matched = reg.by_attributes(&keys(&["limit"]));
        assert_eq!(matched.keys().collect::<Vec<_>>(), vec!["optional_only"]);
        // Units without inputs are only reachable by id.
        assert!(reg.by_attributes(&keys(&["token"])).is_empty());
        assert!(reg.by_attributes(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_cf006_by_attributes_of_kind() {
        let mut reg = Registry::new();
        reg.register(unit(
            UnitDescriptor::new("cap", "1").with_input(PropertySpec::required("x", TypeTag::String)),
        ));
        reg.register(unit(
            UnitDescriptor::new("act", "1")
                .with_kind(UnitKind::Action)
                .with_input(PropertySpec::required("x", TypeTag::String)),
        ));
        let caps = reg.by_attributes_of_kind(&keys(&["x"]), UnitKind::Capability);
        assert_eq!(caps.keys().collect::<Vec<_>>(), vec!["cap"]);
        let acts = reg.by_attributes_of_kind(&keys(&["x"]), UnitKind::Action);
        assert_eq!(acts.keys().collect::<Vec<_>>(), vec!["act"]);
    }
}
