//! CF-004: Plan generation — classify the provider graph and linearize it.
//!
//! Missing dependencies take precedence over cycles: a plan with both is
//! reported as `Missing`, since no ordering could run it anyway.

use super::context::Context;
use super::error::PlanError;
use super::registry::Registry;
use super::resolver::{self, DependencyGraph};
use super::types::{ExecutionPlan, Infeasibility, OrderedPlan};
use crate::journal::hasher;
use tracing::{debug, info};

/// Builds plans against a fixed registry.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    registry: &'a Registry,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Provider graph for `target`, without classification.
    pub fn build_graph(&self, target: &str, context: &Context) -> Result<DependencyGraph, PlanError> {
        resolver::build_graph(self.registry, target, context)
    }

    /// Plan `target` against `context`. Only an unknown target is an error.
    pub fn build_plan(&self, target: &str, context: &Context) -> Result<ExecutionPlan, PlanError> {
        let graph = self.build_graph(target, context)?;
        let plan = classify(&graph);
        match &plan {
            ExecutionPlan::Ordered(ordered) => {
                info!(unit = %target, steps = ordered.steps.len(), "plan ready");
            }
            ExecutionPlan::Infeasible(reason) => {
                info!(unit = %target, reason = %reason, "plan infeasible");
            }
        }
        Ok(plan)
    }

    /// Fingerprint of an ordered plan over the current unit versions.
    pub fn fingerprint(&self, plan: &OrderedPlan) -> String {
        plan_fingerprint(self.registry, plan)
    }
}

/// Turn a graph into an ordered or infeasible plan.
pub fn classify(graph: &DependencyGraph) -> ExecutionPlan {
    let missing = graph.missing_keys();
    if !missing.is_empty() {
        debug!(unit = %graph.target(), missing = ?missing, "unresolved keys");
        return ExecutionPlan::Infeasible(Infeasibility::Missing(missing));
    }

    match graph.layered_order() {
        Ok(levels) => {
            let steps = levels.iter().flatten().cloned().collect();
            ExecutionPlan::Ordered(OrderedPlan {
                target: graph.target().to_string(),
                steps,
                levels,
            })
        }
        Err(members) => ExecutionPlan::Infeasible(Infeasibility::Cyclic { members }),
    }
}

/// BLAKE3 over the target and each step pinned to its registered version.
pub fn plan_fingerprint(registry: &Registry, plan: &OrderedPlan) -> String {
    let pinned: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|id| {
            let version = registry
                .get(id)
                .map(|u| u.descriptor().version.as_str())
                .unwrap_or("?");
            (id.as_str(), version)
        })
        .collect();
    hasher::plan_hash(&plan.target, pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outputs, PropertySpec, TypeTag, UnitDescriptor};
    use crate::core::unit::FnUnit;
    use proptest::prelude::*;

    fn unit(id: &str, needs: &[&str], gives: &[&str]) -> FnUnit {
        let mut d = UnitDescriptor::new(id, "1.0");
        for k in needs {
            d = d.with_input(PropertySpec::required(*k, TypeTag::String));
        }
        for k in gives {
            d = d.with_output(*k);
        }
        FnUnit::new(d, |_| Ok(Outputs::new()))
    }

    fn token_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_unit(unit("org.demo.a", &[], &["token"]));
        reg.register_unit(unit("org.demo.b", &["token"], &["result"]));
        reg
    }

    #[test]
    fn test_cf004_provider_precedes_consumer() {
        let reg = token_registry();
        let plan = Planner::new(&reg)
            .build_plan("org.demo.b", &Context::new())
            .unwrap();
        assert_eq!(
            plan.steps().unwrap(),
            &["org.demo.a".to_string(), "org.demo.b".to_string()]
        );
    }

    #[test]
    fn test_cf004_context_short_circuits_provider() {
        let reg = token_registry();
        let ctx: Context = [("token", "given")].into_iter().collect();
        let plan = Planner::new(&reg).build_plan("org.demo.b", &ctx).unwrap();
        assert_eq!(plan.steps().unwrap(), &["org.demo.b".to_string()]);
    }

    #[test]
    fn test_cf004_missing_reports_key() {
        let mut reg = Registry::new();
        reg.register_unit(unit("org.demo.b", &["token"], &["result"]));
        let plan = Planner::new(&reg)
            .build_plan("org.demo.b", &Context::new())
            .unwrap();
        assert!(!plan.is_ordered());
        let missing: Vec<_> = plan.missing().unwrap().iter().cloned().collect();
        assert_eq!(missing, vec!["token"]);
    }

    #[test]
    fn test_cf004_unknown_target_is_error() {
        let reg = token_registry();
        let err = Planner::new(&reg)
            .build_plan("org.demo.ghost", &Context::new())
            .unwrap_err();
        assert!(err.to_string().contains("org.demo.ghost"));
    }

    #[test]
    fn test_cf004_unknown_requested_provider_is_error() {
        let mut reg = Registry::new();
        reg.register_unit(FnUnit::new(
            UnitDescriptor::new("report", "1.0").with_request("org.ghost.sync", None),
            |_| Ok(Outputs::new()),
        ));
        let err = Planner::new(&reg)
            .build_plan("report", &Context::new())
            .unwrap_err();
        assert_eq!(err, PlanError::UnitNotFound("org.ghost.sync".to_string()));
    }

    #[test]
    fn test_cf004_no_inputs_is_single_step() {
        let reg = token_registry();
        let plan = Planner::new(&reg)
            .build_plan("org.demo.a", &Context::new())
            .unwrap();
        assert_eq!(plan.steps().unwrap(), &["org.demo.a".to_string()]);
    }

    #[test]
    fn test_cf004_cycle_is_infeasible() {
        let mut reg = Registry::new();
        reg.register_unit(unit("a", &["kb"], &["ka"]));
        reg.register_unit(unit("b", &["ka"], &["kb"]));
        let plan = Planner::new(&reg).build_plan("a", &Context::new()).unwrap();
        assert!(plan.is_cyclic());
        match plan {
            ExecutionPlan::Infeasible(Infeasibility::Cyclic { members }) => {
                assert_eq!(members, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cf004_missing_wins_over_cycle() {
        let mut reg = Registry::new();
        reg.register_unit(unit("a", &["kb", "absent"], &["ka"]));
        reg.register_unit(unit("b", &["ka"], &["kb"]));
        let plan = Planner::new(&reg).build_plan("a", &Context::new()).unwrap();
        assert!(plan.missing().unwrap().contains("absent"));
    }

    #[test]
    fn test_cf004_shared_provider_runs_once() {
        let mut reg = Registry::new();
        reg.register_unit(unit("auth", &[], &["token"]));
        reg.register_unit(unit("list", &["token"], &["docs"]));
        reg.register_unit(unit("tags", &["token"], &["labels"]));
        reg.register_unit(unit("report", &["docs", "labels"], &[]));
        let plan = Planner::new(&reg).build_plan("report", &Context::new()).unwrap();
        let steps = plan.steps().unwrap();
        assert_eq!(steps.iter().filter(|s| *s == "auth").count(), 1);
        assert_eq!(steps, &["auth", "list", "tags", "report"]);
    }

    #[test]
    fn test_cf004_unrelated_units_excluded() {
        let mut reg = token_registry();
        reg.register_unit(unit("org.demo.unrelated", &[], &["noise"]));
        let plan = Planner::new(&reg)
            .build_plan("org.demo.b", &Context::new())
            .unwrap();
        assert!(!plan.steps().unwrap().contains(&"org.demo.unrelated".to_string()));
    }

    #[test]
    fn test_cf004_requested_provider_ordered_first() {
        let mut reg = Registry::new();
        reg.register_unit(unit("sync", &[], &[]));
        reg.register_unit(FnUnit::new(
            UnitDescriptor::new("report", "1.0").with_request("sync", None),
            |_| Ok(Outputs::new()),
        ));
        let plan = Planner::new(&reg).build_plan("report", &Context::new()).unwrap();
        assert_eq!(plan.steps().unwrap(), &["sync", "report"]);
    }

    #[test]
    fn test_cf004_fingerprint_tracks_versions() {
        let reg = token_registry();
        let planner = Planner::new(&reg);
        let ExecutionPlan::Ordered(ordered) = planner
            .build_plan("org.demo.b", &Context::new())
            .unwrap()
        else {
            panic!("expected ordered plan");
        };
        let h1 = planner.fingerprint(&ordered);
        assert!(h1.starts_with("blake3:"));

        let mut bumped = Registry::new();
        bumped.register_unit(FnUnit::new(
            UnitDescriptor::new("org.demo.a", "2.0").with_output("token"),
            |_| Ok(Outputs::new()),
        ));
        bumped.register_unit(unit("org.demo.b", &["token"], &["result"]));
        assert_ne!(h1, plan_fingerprint(&bumped, &ordered));
    }

    proptest! {
        /// A chain u0 <- u1 <- ... <- un always plans in chain order.
        #[test]
        fn test_cf004_chain_order(len in 1usize..12) {
            let mut reg = Registry::new();
            for i in 0..len {
                let needs: Vec<String> = if i == 0 { vec![] } else { vec![format!("k{}", i - 1)] };
                let needs: Vec<&str> = needs.iter().map(String::as_str).collect();
                let gives = format!("k{}", i);
                reg.register_unit(unit(&format!("u{:02}", i), &needs, &[gives.as_str()]));
            }
            let target = format!("u{:02}", len - 1);
            let plan = Planner::new(&reg).build_plan(&target, &Context::new()).unwrap();
            let steps = plan.steps().unwrap();
            prop_assert_eq!(steps.len(), len);
            for (i, step) in steps.iter().enumerate() {
                prop_assert_eq!(step, &format!("u{:02}", i));
            }
        }

        /// Seeding any chain key cuts every provider upstream of it.
        #[test]
        fn test_cf004_seed_truncates_chain(len in 2usize..10, seed in 0usize..9) {
            let seed = seed % (len - 1);
            let mut reg = Registry::new();
            for i in 0..len {
                let needs: Vec<String> = if i == 0 { vec![] } else { vec![format!("k{}", i - 1)] };
                let needs: Vec<&str> = needs.iter().map(String::as_str).collect();
                let gives = format!("k{}", i);
                reg.register_unit(unit(&format!("u{:02}", i), &needs, &[gives.as_str()]));
            }
            let mut ctx = Context::new();
            ctx.insert(format!("k{}", seed), "seeded");
            let target = format!("u{:02}", len - 1);
            let plan = Planner::new(&reg).build_plan(&target, &ctx).unwrap();
            prop_assert_eq!(plan.steps().unwrap().len(), len - 1 - seed);
        }
    }
}
