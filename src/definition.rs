//! Funnel definitions: a catalogue of wildcard steps plus the allowed successions.
//!
//! Loading validates the whole graph up front. A definition that loads is
//! acyclic, weakly connected, and has at least one entry step, and it is never
//! mutated afterwards, so it can be shared freely across matching workers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::component::Component;
use crate::errors::FunnelError;
use crate::step::{FunnelStep, StepId};
use crate::types::{ComponentValue, StepName};

/// Node catalogue entry: a step name plus its component constraints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique step name.
    pub name: StepName,
    /// Component name (case-insensitive) to required value; omitted components are wildcards.
    #[serde(default)]
    pub constraints: BTreeMap<String, ComponentValue>,
}

impl NodeSpec {
    /// Node with `(component, value)` constraint pairs.
    pub fn new<K, V, I>(name: impl Into<StepName>, constraints: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ComponentValue>,
    {
        Self {
            name: name.into(),
            constraints: constraints
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Edge list entry: `to` may legitimately follow `from`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Source step name.
    pub from: StepName,
    /// Target step name.
    pub to: StepName,
}

impl EdgeSpec {
    /// Edge from `from` to `to`.
    pub fn new(from: impl Into<StepName>, to: impl Into<StepName>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Combined document form holding both the catalogue and the edge list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunnelDocument {
    /// Node catalogue.
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    /// Edge list; may be omitted for a single-step funnel.
    pub edges: Vec<EdgeSpec>,
}

/// Directed graph of funnel steps.
#[derive(Clone, Debug)]
pub struct FunnelDefinition {
    steps: Vec<FunnelStep>,
    by_name: IndexMap<StepName, StepId>,
    successors: Vec<Vec<StepId>>,
    predecessors: Vec<Vec<StepId>>,
    entries: Vec<StepId>,
    topological: Vec<StepId>,
}

impl FunnelDefinition {
    /// Build and validate a definition from a node catalogue and an edge list.
    ///
    /// Step ids follow catalogue order. Successors keep edge-declaration order,
    /// which is also the order the matcher tries them in. Repeated edges are
    /// collapsed.
    pub fn load(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> Result<Self, FunnelError> {
        if nodes.is_empty() {
            return Err(FunnelError::MalformedFunnel(
                "node catalogue is empty".to_string(),
            ));
        }

        let mut steps = Vec::with_capacity(nodes.len());
        let mut by_name = IndexMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            let id = StepId(idx);
            if by_name.insert(node.name.clone(), id).is_some() {
                return Err(FunnelError::MalformedFunnel(format!(
                    "step '{}' is defined more than once",
                    node.name
                )));
            }
            let mut constraints = Vec::with_capacity(node.constraints.len());
            for (key, value) in &node.constraints {
                let component = Component::from_name(key).ok_or_else(|| {
                    FunnelError::MalformedFunnel(format!(
                        "step '{}' constrains unknown component '{}'",
                        node.name, key
                    ))
                })?;
                constraints.push((component, value.clone()));
            }
            steps.push(FunnelStep::new(id, node.name.clone(), constraints));
        }

        let mut successors: Vec<Vec<StepId>> = vec![Vec::new(); steps.len()];
        let mut predecessors: Vec<Vec<StepId>> = vec![Vec::new(); steps.len()];
        for edge in edges {
            let from = resolve_edge_end(&by_name, edge, &edge.from)?;
            let to = resolve_edge_end(&by_name, edge, &edge.to)?;
            if successors[from.0].contains(&to) {
                debug!(from = %edge.from, to = %edge.to, "ignoring repeated funnel edge");
                continue;
            }
            successors[from.0].push(to);
            predecessors[to.0].push(from);
        }

        let entries: Vec<StepId> = steps
            .iter()
            .map(FunnelStep::id)
            .filter(|id| predecessors[id.0].is_empty())
            .collect();
        if entries.is_empty() {
            return Err(FunnelError::MalformedFunnel(
                "funnel has no entry step (every step has a predecessor)".to_string(),
            ));
        }

        let topological = topological_order(&successors, &predecessors);
        if topological.len() != steps.len() {
            let mut cyclic: Vec<&str> = steps
                .iter()
                .filter(|step| !topological.contains(&step.id()))
                .map(FunnelStep::name)
                .collect();
            cyclic.sort_unstable();
            return Err(FunnelError::MalformedFunnel(format!(
                "funnel steps form a cycle: {}",
                cyclic.join(", ")
            )));
        }

        let unreachable = disconnected_steps(&successors, &predecessors);
        if !unreachable.is_empty() {
            let names: Vec<&str> = unreachable
                .iter()
                .map(|id| steps[id.0].name())
                .collect();
            return Err(FunnelError::MalformedFunnel(format!(
                "steps disconnected from entry step '{}': {}",
                steps[entries[0].0].name(),
                names.join(", ")
            )));
        }

        debug!(
            steps = steps.len(),
            edges = successors.iter().map(Vec::len).sum::<usize>(),
            entries = entries.len(),
            "loaded funnel definition"
        );

        Ok(Self {
            steps,
            by_name,
            successors,
            predecessors,
            entries,
            topological,
        })
    }

    /// Load from a combined document.
    pub fn from_document(document: &FunnelDocument) -> Result<Self, FunnelError> {
        Self::load(&document.nodes, &document.edges)
    }

    /// Load from the two JSON documents: a node array and an edge array.
    pub fn from_json(nodes_json: &str, edges_json: &str) -> Result<Self, FunnelError> {
        let nodes: Vec<NodeSpec> = serde_json::from_str(nodes_json)?;
        let edges: Vec<EdgeSpec> = serde_json::from_str(edges_json)?;
        Self::load(&nodes, &edges)
    }

    /// Load from a node catalogue file and an edge list file (JSON).
    pub fn from_files(nodes_path: &Path, edges_path: &Path) -> Result<Self, FunnelError> {
        let nodes = fs::read_to_string(nodes_path)?;
        let edges = fs::read_to_string(edges_path)?;
        Self::from_json(&nodes, &edges)
    }

    /// Load from a single JSON file holding `{ "nodes": [...], "edges": [...] }`.
    pub fn from_document_file(path: &Path) -> Result<Self, FunnelError> {
        let raw = fs::read_to_string(path)?;
        let document: FunnelDocument = serde_json::from_str(&raw)?;
        Self::from_document(&document)
    }

    /// Steps with no incoming edge, in catalogue order.
    pub fn entry_steps(&self) -> &[StepId] {
        &self.entries
    }

    /// Steps reachable from `step` by one edge, in declaration order.
    pub fn next_steps(&self, step: StepId) -> &[StepId] {
        &self.successors[step.0]
    }

    /// Steps with an edge into `step`.
    pub fn previous_steps(&self, step: StepId) -> &[StepId] {
        &self.predecessors[step.0]
    }

    /// Returns `true` when `step` has no outgoing edge.
    pub fn is_terminal(&self, step: StepId) -> bool {
        self.successors[step.0].is_empty()
    }

    /// Step at `id`. Panics if `id` does not belong to this definition.
    pub fn step(&self, id: StepId) -> &FunnelStep {
        &self.steps[id.0]
    }

    /// Step declared as `name`.
    pub fn step_by_name(&self, name: &str) -> Option<&FunnelStep> {
        self.by_name.get(name).map(|id| &self.steps[id.0])
    }

    /// All steps in catalogue order.
    pub fn steps(&self) -> &[FunnelStep] {
        &self.steps
    }

    /// All edges as `(from, to)` pairs, grouped by source in catalogue order.
    pub fn edges(&self) -> impl Iterator<Item = (StepId, StepId)> + '_ {
        self.successors
            .iter()
            .enumerate()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (StepId(from), *to)))
    }

    /// One topological ordering of the steps (stable with respect to catalogue order).
    pub fn topological_order(&self) -> &[StepId] {
        &self.topological
    }

    /// Position of `step` in [`Self::topological_order`].
    pub fn topological_rank(&self, step: StepId) -> usize {
        self.topological
            .iter()
            .position(|candidate| *candidate == step)
            .unwrap_or(usize::MAX)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false` for a loaded definition.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn resolve_edge_end(
    by_name: &IndexMap<StepName, StepId>,
    edge: &EdgeSpec,
    end: &str,
) -> Result<StepId, FunnelError> {
    by_name.get(end).copied().ok_or_else(|| {
        FunnelError::MalformedFunnel(format!(
            "edge '{}' -> '{}' references undefined step '{}'",
            edge.from, edge.to, end
        ))
    })
}

/// Kahn's algorithm; returns fewer ids than steps when a cycle exists.
fn topological_order(successors: &[Vec<StepId>], predecessors: &[Vec<StepId>]) -> Vec<StepId> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: VecDeque<StepId> = (0..successors.len())
        .filter(|idx| in_degree[*idx] == 0)
        .map(StepId)
        .collect();
    let mut order = Vec::with_capacity(successors.len());
    while let Some(id) = ready.pop_front() {
        order.push(id);
        for next in &successors[id.0] {
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                ready.push_back(*next);
            }
        }
    }
    order
}

/// Steps outside the weakly connected component of the first step.
fn disconnected_steps(successors: &[Vec<StepId>], predecessors: &[Vec<StepId>]) -> Vec<StepId> {
    let mut seen = vec![false; successors.len()];
    let mut queue = VecDeque::from([StepId(0)]);
    seen[0] = true;
    while let Some(id) = queue.pop_front() {
        for neighbor in successors[id.0].iter().chain(&predecessors[id.0]) {
            if !seen[neighbor.0] {
                seen[neighbor.0] = true;
                queue.push_back(*neighbor);
            }
        }
    }
    seen.iter()
        .enumerate()
        .filter(|(_, visited)| !**visited)
        .map(|(idx, _)| StepId(idx))
        .collect()
}
