//! CF-003: Provider resolution and dependency DAG construction.
//!
//! Starting from a target unit, walks required inputs breadth-first and binds
//! each one to the initial context, to the first registered unit producing it,
//! or to a `Missing` node. Topological order over unit nodes uses Kahn's
//! algorithm, layer by layer, with alphabetical tie-breaking for determinism.
//!
//! Requested providers are not keys: a request naming an unregistered unit
//! fails the build with `UnitNotFound` instead of becoming `Missing`.

use super::context::Context;
use super::error::PlanError;
use super::registry::Registry;
use indexmap::IndexSet;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Unit(String),
    Context(String),
    Missing(String),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit(id) => write!(f, "unit:{}", id),
            Self::Context(key) => write!(f, "context:{}", key),
            Self::Missing(key) => write!(f, "missing:{}", key),
        }
    }
}

/// Edge label, pointing from provider to consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeLabel {
    /// Context value feeds a unit
    Provides,
    /// Unit output feeds a unit
    ProvidesKey(String),
    /// Unresolved key a unit needs
    Required,
    /// Direct provider request
    Requested,
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provides => write!(f, "provides"),
            Self::ProvidesKey(key) => write!(f, "provides:{}", key),
            Self::Required => write!(f, "required"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: Node,
    pub to: Node,
    pub label: EdgeLabel,
}

/// Provider graph for one plan request.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    target: String,
    nodes: IndexSet<Node>,
    edges: IndexSet<Edge>,
}

impl DependencyGraph {
    pub fn new(target: impl Into<String>) -> Self {
        let target = target.into();
        let mut graph = Self {
            target: target.clone(),
            ..Self::default()
        };
        graph.add_node(Node::Unit(target));
        graph
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node);
    }

    /// Add an edge (and its endpoints). Identical edges are stored once.
    pub fn add_edge(&mut self, from: Node, to: Node, label: EdgeLabel) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.edges.insert(Edge { from, to, label });
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Unit ids in discovery order.
    pub fn units(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Unit(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn missing_keys(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Missing(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Kahn layers over unit nodes. `Err` carries the units left on a cycle.
    pub fn layered_order(&self) -> Result<Vec<Vec<String>>, Vec<String>> {
        let unit_ids: Vec<String> = self.units().into_iter().map(str::to_string).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

        for id in &unit_ids {
            in_degree.insert(id, 0);
            adjacency.insert(id, Vec::new());
        }

        for edge in &self.edges {
            if let (Node::Unit(from), Node::Unit(to)) = (&edge.from, &edge.to) {
                if let Some(neighbors) = adjacency.get_mut(from.as_str()) {
                    neighbors.push(to);
                }
                if let Some(degree) = in_degree.get_mut(to.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut layer: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        layer.sort_unstable();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut placed = 0usize;
        while !layer.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for current in &layer {
                for neighbor in adjacency.get(current).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*neighbor);
                        }
                    }
                }
            }
            placed += layer.len();
            levels.push(layer.iter().map(|s| s.to_string()).collect());
            next.sort_unstable();
            next.dedup();
            layer = next;
        }

        if placed != unit_ids.len() {
            let ordered: HashSet<&str> = levels.iter().flatten().map(String::as_str).collect();
            let mut members: Vec<String> = unit_ids
                .iter()
                .filter(|id| !ordered.contains(id.as_str()))
                .cloned()
                .collect();
            members.sort();
            return Err(members);
        }

        Ok(levels)
    }
}

/// Build the provider graph for `target` against `context`.
pub fn build_graph(
    registry: &Registry,
    target: &str,
    context: &Context,
) -> Result<DependencyGraph, PlanError> {
    if !registry.contains(target) {
        return Err(PlanError::UnitNotFound(target.to_string()));
    }

    let mut graph = DependencyGraph::new(target);
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([target.to_string()]);

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(unit) = registry.get(&current) else {
            continue;
        };
        let descriptor = unit.descriptor();
        let consumer = Node::Unit(current.clone());
        debug!(unit = %current, "resolving requirements");

        for property in descriptor.required_inputs() {
            let key = &property.name;

            if context.contains(key) {
                debug!(unit = %current, key = %key, "satisfied from context");
                graph.add_edge(Node::Context(key.clone()), consumer.clone(), EdgeLabel::Provides);
                continue;
            }

            let candidates = registry.providers_of(key);
            match candidates.first() {
                Some(&provider) => {
                    if candidates.len() > 1 {
                        warn!(
                            key = %key,
                            chosen = %provider,
                            candidates = ?candidates,
                            "multiple units produce the same key; using the first registered"
                        );
                    }
                    debug!(unit = %current, key = %key, provider = %provider, "resolved provider");
                    graph.add_edge(
                        Node::Unit(provider.to_string()),
                        consumer.clone(),
                        EdgeLabel::ProvidesKey(key.clone()),
                    );
                    if !visited.contains(provider) {
                        queue.push_back(provider.to_string());
                    }
                }
                None => {
                    debug!(unit = %current, key = %key, "missing dependency");
                    graph.add_edge(Node::Missing(key.clone()), consumer.clone(), EdgeLabel::Required);
                }
            }
        }

        for request in &descriptor.requests {
            let satisfied = match request.condition.as_deref() {
                None | Some("") => true,
                Some(condition) => context.is_truthy(condition),
            };
            if !satisfied {
                continue;
            }
            if !registry.contains(&request.id) {
                return Err(PlanError::UnitNotFound(request.id.clone()));
            }
            debug!(unit = %current, provider = %request.id, "resolved requested provider");
            graph.add_edge(
                Node::Unit(request.id.clone()),
                consumer.clone(),
                EdgeLabel::Requested,
            );
            if !visited.contains(&request.id) {
                queue.push_back(request.id.clone());
            }
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outputs, PropertySpec, TypeTag, UnitDescriptor};
    use crate::core::unit::FnUnit;

    fn register(reg: &mut Registry, descriptor: UnitDescriptor) {
        reg.register_unit(FnUnit::new(descriptor, |_| Ok(Outputs::new())));
    }

    fn requires(id: &str, keys: &[&str], outputs: &[&str]) -> UnitDescriptor {
        let mut d = UnitDescriptor::new(id, "1");
        for k in keys {
            d = d.with_input(PropertySpec::required(*k, TypeTag::String));
        }
        for o in outputs {
            d = d.with_output(*o);
        }
        d
    }

    #[test]
    fn test_cf003_unknown_target() {
        let reg = Registry::new();
        let err = build_graph(&reg, "ghost", &Context::new()).unwrap_err();
        assert_eq!(err, PlanError::UnitNotFound("ghost".to_string()));
    }

    #[test]
    fn test_cf003_context_edge() {
        let mut reg = Registry::new();
        register(&mut reg, requires("b", &["token"], &["result"]));
        let ctx: Context = [("token", "t1")].into_iter().collect();
        let graph = build_graph(&reg, "b", &ctx).unwrap();
        let edge = graph.edges().next().unwrap();
        assert_eq!(edge.from, Node::Context("token".into()));
        assert_eq!(edge.to, Node::Unit("b".into()));
        assert_eq!(edge.label.to_string(), "provides");
    }

    #[test]
    fn test_cf003_provider_edge_label() {
        let mut reg = Registry::new();
        register(&mut reg, requires("a", &[], &["token"]));
        register(&mut reg, requires("b", &["token"], &["result"]));
        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        let labels: Vec<String> = graph.edges().map(|e| e.label.to_string()).collect();
        assert_eq!(labels, vec!["provides:token"]);
        assert_eq!(graph.units(), vec!["b", "a"]);
    }

    #[test]
    fn test_cf003_context_wins_over_provider() {
        let mut reg = Registry::new();
        register(&mut reg, requires("a", &[], &["token"]));
        register(&mut reg, requires("b", &["token"], &["result"]));
        let ctx: Context = [("token", "given")].into_iter().collect();
        let graph = build_graph(&reg, "b", &ctx).unwrap();
        assert_eq!(graph.units(), vec!["b"]);
    }

    #[test]
    fn test_cf003_first_registered_provider_wins() {
        let mut reg = Registry::new();
        register(&mut reg, requires("z.first", &[], &["token"]));
        register(&mut reg, requires("a.second", &[], &["token"]));
        register(&mut reg, requires("b", &["token"], &[]));
        assert_eq!(reg.providers_of("token"), vec!["z.first", "a.second"]);
        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        assert!(graph.units().contains(&"z.first"));
        assert!(!graph.units().contains(&"a.second"));
        assert!(graph.edges().any(|e| e.from == Node::Unit("z.first".into())
            && e.label == EdgeLabel::ProvidesKey("token".into())));
    }

    #[test]
    fn test_cf003_missing_accumulates_all() {
        let mut reg = Registry::new();
        register(&mut reg, requires("a", &["x"], &["token"]));
        register(&mut reg, requires("b", &["token", "y"], &[]));
        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        let missing: Vec<_> = graph.missing_keys().into_iter().collect();
        assert_eq!(missing, vec!["x", "y"]);
    }

    #[test]
    fn test_cf003_optional_inputs_ignored() {
        let mut reg = Registry::new();
        register(
            &mut reg,
            UnitDescriptor::new("b", "1").with_input(PropertySpec::optional("limit", TypeTag::Integer)),
        );
        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        assert!(graph.missing_keys().is_empty());
        assert_eq!(graph.edges().count(), 0);
    }

    #[test]
    fn test_cf003_request_condition() {
        let mut reg = Registry::new();
        register(&mut reg, requires("sync", &[], &[]));
        register(&mut reg, UnitDescriptor::new("b", "1").with_request("sync", Some("refresh")));

        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        assert_eq!(graph.units(), vec!["b"]);

        let ctx: Context = [("refresh", true)].into_iter().collect();
        let graph = build_graph(&reg, "b", &ctx).unwrap();
        assert_eq!(graph.units(), vec!["b", "sync"]);
        assert!(graph
            .edges()
            .any(|e| e.label == EdgeLabel::Requested && e.from == Node::Unit("sync".into())));

        let ctx: Context = [("refresh", false)].into_iter().collect();
        let graph = build_graph(&reg, "b", &ctx).unwrap();
        assert_eq!(graph.units(), vec!["b"]);
    }

    #[test]
    fn test_cf003_request_to_unknown_unit_is_error() {
        let mut reg = Registry::new();
        register(&mut reg, UnitDescriptor::new("b", "1").with_request("org.ghost.sync", None));
        let err = build_graph(&reg, "b", &Context::new()).unwrap_err();
        assert_eq!(err, PlanError::UnitNotFound("org.ghost.sync".to_string()));
    }

    #[test]
    fn test_cf003_unmet_condition_skips_unknown_request() {
        let mut reg = Registry::new();
        register(
            &mut reg,
            UnitDescriptor::new("b", "1").with_request("org.ghost.sync", Some("refresh")),
        );
        let graph = build_graph(&reg, "b", &Context::new()).unwrap();
        assert_eq!(graph.units(), vec!["b"]);
        assert!(graph.missing_keys().is_empty());
    }

    #[test]
    fn test_cf003_topo_linear() {
        let mut reg = Registry::new();
        register(&mut reg, requires("a", &[], &["k1"]));
        register(&mut reg, requires("b", &["k1"], &["k2"]));
        register(&mut reg, requires("c", &["k2"], &[]));
        let graph = build_graph(&reg, "c", &Context::new()).unwrap();
        let levels = graph.layered_order().unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_cf003_topo_diamond() {
        let mut reg = Registry::new();
        register(&mut reg, requires("top", &[], &["t"]));
        register(&mut reg, requires("right", &["t"], &["r"]));
        register(&mut reg, requires("left", &["t"], &["l"]));
        register(&mut reg, requires("bottom", &["l", "r"], &[]));
        let graph = build_graph(&reg, "bottom", &Context::new()).unwrap();
        let levels = graph.layered_order().unwrap();
        // left and right share a layer, alphabetical
        assert_eq!(
            levels,
            vec![vec!["top"], vec!["left", "right"], vec!["bottom"]]
        );
    }

    #[test]
    fn test_cf003_topo_cycle() {
        let mut reg = Registry::new();
        register(&mut reg, requires("a", &["from_b"], &["from_a"]));
        register(&mut reg, requires("b", &["from_a"], &["from_b"]));
        let graph = build_graph(&reg, "a", &Context::new()).unwrap();
        let members = graph.layered_order().unwrap_err();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[test]
    fn test_cf003_self_provider_is_cycle() {
        let mut reg = Registry::new();
        register(&mut reg, requires("loop", &["k"], &["k"]));
        let graph = build_graph(&reg, "loop", &Context::new()).unwrap();
        assert_eq!(graph.layered_order().unwrap_err(), vec!["loop"]);
    }
}
