//! Dependency graph between the aggregates of a store.

use std::collections::{HashMap, VecDeque};

/// Directed graph whose edges point from an aggregate to the aggregates
/// consuming its output.
///
/// An aggregate may read several inputs. The topological order is
/// recomputed on every change and breaks ties by registration order, which
/// keeps dispatch deterministic.
#[derive(Debug, Clone, Default)]
pub struct AggregateGraph {
    nodes: Vec<(String, Vec<String>)>,
    order: Vec<String>,
}

impl AggregateGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregates.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds no aggregate.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether an aggregate named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|(node, _)| node == name)
    }

    /// Declared inputs of `name`, in declaration order.
    pub fn inputs_of(&self, name: &str) -> &[String] {
        self.nodes
            .iter()
            .find(|(node, _)| node == name)
            .map_or(&[][..], |(_, inputs)| inputs.as_slice())
    }

    /// Aggregates in dispatch order: every aggregate after its inputs.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Aggregates reading `name` directly, in dispatch order.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|node| self.inputs_of(node).iter().any(|input| input == name))
            .cloned()
            .collect()
    }

    /// Aggregates reading `name` directly or transitively, in dispatch order.
    pub fn downstream(&self, name: &str) -> Vec<String> {
        let mut reached: Vec<&str> = vec![name];
        let mut downstream = Vec::new();
        for node in &self.order {
            if self
                .inputs_of(node)
                .iter()
                .any(|input| reached.contains(&input.as_str()))
            {
                reached.push(node);
                downstream.push(node.clone());
            }
        }
        downstream
    }

    /// Returns a copy with `name` added, or redefined to read `inputs`.
    ///
    /// Fails with the offending cycle, starting and ending at `name`, when
    /// the change would make the graph cyclic.
    pub fn with_node<S: AsRef<str>>(&self, name: &str, inputs: &[S]) -> Result<Self, Vec<String>> {
        let mut nodes = self.nodes.clone();
        let inputs: Vec<String> = inputs.iter().map(|input| input.as_ref().to_string()).collect();
        match nodes.iter_mut().find(|(node, _)| node == name) {
            Some(existing) => existing.1 = inputs,
            None => nodes.push((name.to_string(), inputs)),
        }
        match topological_order(&nodes) {
            Some(order) => Ok(Self { nodes, order }),
            None => Err(cycle_through(&nodes, name)),
        }
    }

    /// Returns a copy without `name`. Dependents of `name` lose that edge.
    pub fn without_node(&self, name: &str) -> Self {
        let nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|(node, _)| node != name)
            .cloned()
            .collect();
        let order = topological_order(&nodes)
            .unwrap_or_else(|| nodes.iter().map(|(node, _)| node.clone()).collect());
        Self { nodes, order }
    }
}

/// Kahn's algorithm; `None` when the nodes contain a cycle.
fn topological_order(nodes: &[(String, Vec<String>)]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(position, (name, _))| (name.as_str(), position))
        .collect();
    let mut indegree = vec![0_usize; nodes.len()];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (position, (_, inputs)) in nodes.iter().enumerate() {
        for input in inputs {
            if let Some(&upstream) = index.get(input.as_str()) {
                indegree[position] += 1;
                consumers[upstream].push(position);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len())
        .filter(|position| indegree[*position] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(position) = ready.pop_front() {
        order.push(nodes[position].0.clone());
        for &consumer in &consumers[position] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push_back(consumer);
            }
        }
    }
    (order.len() == nodes.len()).then_some(order)
}

/// Depth-first walk along inputs from `start` back to `start`.
fn cycle_through(nodes: &[(String, Vec<String>)], start: &str) -> Vec<String> {
    let inputs_of = |name: &str| {
        nodes
            .iter()
            .find(|(node, _)| node == name)
            .map_or(&[][..], |(_, inputs)| inputs.as_slice())
    };
    let mut path = vec![start.to_string()];
    let mut visited: Vec<String> = Vec::new();
    let mut frames: Vec<std::slice::Iter<'_, String>> = vec![inputs_of(start).iter()];
    while let Some(frame) = frames.last_mut() {
        match frame.next() {
            Some(next) if next == start => {
                path.push(next.clone());
                return path;
            }
            Some(next) if !visited.contains(next) => {
                visited.push(next.clone());
                path.push(next.clone());
                frames.push(inputs_of(next).iter());
            }
            Some(_) => {}
            None => {
                frames.pop();
                path.pop();
            }
        }
    }
    vec![start.to_string()]
}
