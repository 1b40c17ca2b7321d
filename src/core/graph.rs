//! SP-004: Dependency graph lifecycle and topological ordering.
//!
//! A graph moves `Building → Resolved → Ordered → Emitted` and never back.
//! Nodes and references can only be added while building; outputs can be
//! attached until the plan is emitted.
//!
//! Ordering uses Kahn's algorithm. When several nodes are ready at once the
//! one declared first wins, so identical input always yields an identical
//! plan.

use super::emitter;
use super::error::GraphError;
use super::resolver::{self, EdgeMap};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::debug;

/// Compute a topological order over an edge map.
///
/// `edges` is keyed by every node id in declaration order; each value is the
/// set of ids that node depends on.
pub fn topological_order(edges: &EdgeMap) -> Result<Vec<String>, GraphError> {
    let ids: Vec<&String> = edges.keys().collect();
    let index: FxHashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; ids.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for (i, deps) in edges.values().enumerate() {
        for dep in deps {
            let d = *index
                .get(dep.as_str())
                .ok_or_else(|| GraphError::DanglingReference {
                    from: ids[i].clone(),
                    to: dep.clone(),
                })?;
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(current) = ready.pop_first() {
        order.push(ids[current].clone());
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != ids.len() {
        let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        let nodes = (0..ids.len())
            .filter(|&i| stuck[i] && on_cycle(i, &dependents, &stuck))
            .map(|i| ids[i].clone())
            .collect();
        return Err(GraphError::CyclicDependency { nodes });
    }

    Ok(order)
}

/// Whether `start` can reach itself through unprocessed nodes.
fn on_cycle(start: usize, dependents: &[Vec<usize>], stuck: &[bool]) -> bool {
    let mut seen = vec![false; dependents.len()];
    let mut stack = dependents[start].clone();
    while let Some(n) = stack.pop() {
        if n == start {
            return true;
        }
        if !stuck[n] || seen[n] {
            continue;
        }
        seen[n] = true;
        stack.extend_from_slice(&dependents[n]);
    }
    false
}

/// All resource nodes, references, and outputs of one deployable unit.
///
/// Not synchronized: mutation needs `&mut self`, so a graph is confined to
/// one builder at a time. Independent graphs can be built on separate threads.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    phase: GraphPhase,
    nodes: IndexMap<String, ResourceNode>,
    references: Vec<Reference>,
    outputs: IndexMap<String, OutputEntry>,
    edges: EdgeMap,
    order: Vec<String>,
    plan: Option<Plan>,
}

impl DependencyGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: GraphPhase::Building,
            nodes: IndexMap::new(),
            references: Vec::new(),
            outputs: IndexMap::new(),
            edges: EdgeMap::new(),
            order: Vec::new(),
            plan: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Outputs in declaration order.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputEntry> {
        self.outputs.values()
    }

    /// Resolved dependency set of a node. `None` before resolution.
    pub fn dependencies(&self, id: &str) -> Option<&IndexSet<String>> {
        self.edges.get(id)
    }

    /// Topological order. Empty before ordering.
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    fn frozen(&self, operation: String) -> GraphError {
        GraphError::GraphFrozen {
            phase: self.phase,
            operation,
        }
    }

    /// Insert a node. Fails on a duplicate id or once the graph left `Building`.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.phase != GraphPhase::Building {
            return Err(self.frozen(format!("add node '{}'", node.id())));
        }
        if self.nodes.contains_key(node.id()) {
            return Err(GraphError::DuplicateId {
                id: node.id().to_string(),
            });
        }
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    /// Declare an explicit edge. Endpoints are checked at resolution.
    pub fn add_reference(&mut self, reference: Reference) -> Result<(), GraphError> {
        if self.phase != GraphPhase::Building {
            return Err(self.frozen(format!(
                "add reference '{}' -> '{}'",
                reference.from, reference.to
            )));
        }
        self.references.push(reference);
        Ok(())
    }

    /// Attach an output. The source node is looked up at emission.
    pub fn add_output(&mut self, output: OutputEntry) -> Result<(), GraphError> {
        if self.phase == GraphPhase::Emitted {
            return Err(self.frozen(format!("add output '{}'", output.name)));
        }
        if self.outputs.contains_key(&output.name) {
            return Err(GraphError::DuplicateOutput { name: output.name });
        }
        self.outputs.insert(output.name.clone(), output);
        Ok(())
    }

    /// `Building → Resolved`: derive every node's dependency set.
    pub fn resolve(&mut self) -> Result<(), GraphError> {
        if self.phase >= GraphPhase::Resolved {
            return Ok(());
        }
        self.edges = resolver::resolve_edges(self.nodes.values(), &self.references)?;
        self.phase = GraphPhase::Resolved;
        debug!(
            unit = %self.name,
            nodes = self.nodes.len(),
            edges = self.edges.values().map(IndexSet::len).sum::<usize>(),
            "graph resolved"
        );
        Ok(())
    }

    /// `Resolved → Ordered`, resolving first if needed.
    pub fn order(&mut self) -> Result<&[String], GraphError> {
        if self.phase < GraphPhase::Ordered {
            self.resolve()?;
            self.order = topological_order(&self.edges)?;
            self.phase = GraphPhase::Ordered;
            debug!(unit = %self.name, order = ?self.order, "graph ordered");
        }
        Ok(&self.order)
    }

    /// `Ordered → Emitted`, ordering first if needed.
    ///
    /// The plan is built once; later calls return the same plan.
    pub fn emit(&mut self) -> Result<&Plan, GraphError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => {
                self.order()?;
                let plan = emitter::emit(
                    &self.name,
                    &self.order,
                    &self.nodes,
                    &self.edges,
                    &self.outputs,
                )?;
                self.phase = GraphPhase::Emitted;
                debug!(unit = %self.name, fingerprint = %plan.fingerprint, "plan emitted");
                plan
            }
        };
        let plan: &Plan = self.plan.insert(plan);
        Ok(plan)
    }
}
