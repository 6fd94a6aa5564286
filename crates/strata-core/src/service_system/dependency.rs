use std::collections::{BTreeSet, HashMap};
use std::fmt;

use semver::Version;

use crate::service_system::version::VersionRange;

/// Represents a dependency on another service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDependency {
    /// The name of the required service
    pub service: String,

    /// The version range that is acceptable
    pub version_range: Option<VersionRange>,
}

impl ServiceDependency {
    /// Create a dependency on any version of `service`
    pub fn any(service: &str) -> Self {
        Self {
            service: service.to_string(),
            version_range: None,
        }
    }

    /// Create a dependency with a specific version range
    pub fn constrained(service: &str, version_range: VersionRange) -> Self {
        Self {
            service: service.to_string(),
            version_range: Some(version_range),
        }
    }

    /// Check if this dependency accepts the given version
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        match &self.version_range {
            Some(range) => range.includes(version),
            None => true,
        }
    }
}

impl fmt::Display for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_range {
            Some(range) => write!(f, "{} ({})", self.service, range.constraint_string()),
            None => write!(f, "{} (any version)", self.service),
        }
    }
}

/// Directed graph over service names, edges pointing from a service to its
/// dependencies.
///
/// Nodes keep their insertion order; every ordering the graph produces breaks
/// ties by that order, so results never depend on hash iteration.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// node -> dependencies
    edges: Vec<Vec<usize>>,
    /// node -> dependents
    dependents: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index. Adding an existing node is a no-op.
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.edges.push(Vec::new());
        self.dependents.push(Vec::new());
        idx
    }

    /// Add an edge: `service` depends on `dependency`. Both must already be nodes.
    pub fn add_edge(&mut self, service: &str, dependency: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(service), self.index.get(dependency)) else {
            return false;
        };
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
            self.dependents[to].push(from);
        }
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &str {
        &self.nodes[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Find a cycle, searching from `roots` first and then from every other
    /// node in insertion order. The returned path starts and ends on the same
    /// node, e.g. `[a, b, c, a]`.
    pub fn find_cycle(&self, roots: &[&str]) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();

        let starts = roots
            .iter()
            .filter_map(|r| self.index_of(r))
            .chain(0..self.nodes.len());
        for start in starts {
            if marks[start] == Mark::Unvisited {
                if let Some(path) = self.cycle_dfs(start, &mut marks, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }

    fn cycle_dfs(&self, node: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Option<Vec<String>> {
        marks[node] = Mark::OnStack;
        stack.push(node);

        for &dep in &self.edges[node] {
            match marks[dep] {
                Mark::OnStack => {
                    // Back edge: the cycle is the stack suffix starting at `dep`.
                    let pos = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[pos..].iter().map(|&n| self.nodes[n].clone()).collect();
                    path.push(self.nodes[dep].clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = self.cycle_dfs(dep, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    /// Kahn's algorithm, dependencies first. Among nodes that are ready at the
    /// same time the one inserted earliest wins.
    ///
    /// On a cycle, returns the names that could not be ordered.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<String>> {
        let mut pending: Vec<usize> = self.edges.iter().map(|deps| deps.len()).collect();
        let mut ready: BTreeSet<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(self
                .nodes
                .iter()
                .enumerate()
                .filter(|(idx, _)| !order.contains(idx))
                .map(|(_, name)| name.clone())
                .collect())
        }
    }

    /// Depth of each node in `order`: 0 without dependencies, otherwise one
    /// more than its deepest dependency. `order` must be topological.
    pub fn depths(&self, order: &[usize]) -> Vec<usize> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &idx in order {
            depth[idx] = self.edges[idx]
                .iter()
                .map(|&dep| depth[dep] + 1)
                .max()
                .unwrap_or(0);
        }
        order.iter().map(|&idx| depth[idx]).collect()
    }
}
