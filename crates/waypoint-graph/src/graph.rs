//! Phase dependency graph
//!
//! Records which named units depend on which, and answers the cascade
//! question a rollback needs: everything transitively downstream of a node,
//! nearest first.

use crate::error::GraphError;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Node name scoped to one execution: `"<execution_id>/<node>"`
#[must_use]
pub fn namespaced(execution_id: &str, node: &str) -> String {
    format!("{execution_id}/{node}")
}

#[derive(Debug, Default)]
struct Inner {
    /// Edge `target -> source` for every "source depends on target"
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Inner {
    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Neighbours in edge registration order
    fn neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, dir)
            .map(|e| {
                let other = match dir {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (e.id(), other)
            })
            .collect();
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, other)| other).collect()
    }

    /// Breadth-first closure from `start`, excluding `start`
    fn closure(&self, start: &str, dir: Direction) -> Vec<String> {
        let Some(&start) = self.index.get(start) else {
            return Vec::new();
        };

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();

        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node, dir) {
                if visited.insert(next) {
                    out.push(self.graph[next].clone());
                    queue.push_back(next);
                }
            }
        }
        out
    }
}

/// Structural dependencies between phases, plan units and artifacts
///
/// Edges are additive. Cycles are tolerated: traversals visit each node once.
/// Each query holds a single read guard, so it never observes a half-applied
/// registration.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: RwLock<Inner>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source` depends on `target`
    ///
    /// Returns `Ok(false)` if the edge was already known.
    ///
    /// # Errors
    /// [`GraphError::EmptyName`] if either name is empty.
    pub fn register_dependency(&self, source: &str, target: &str) -> Result<bool, GraphError> {
        if source.is_empty() || target.is_empty() {
            return Err(GraphError::EmptyName);
        }

        let mut inner = self.inner.write();
        let from = inner.node(target);
        let to = inner.node(source);
        if inner.graph.find_edge(from, to).is_some() {
            return Ok(false);
        }
        inner.graph.add_edge(from, to, ());
        drop(inner);

        tracing::debug!(source, target, "registered dependency");
        Ok(true)
    }

    /// Everything that transitively depends on `target`, breadth-first
    ///
    /// `target` itself is never included. Unknown targets yield nothing.
    #[must_use]
    pub fn find_dependents(&self, target: &str) -> Vec<String> {
        self.inner.read().closure(target, Direction::Outgoing)
    }

    /// Everything `item` transitively depends on, breadth-first
    #[must_use]
    pub fn find_dependencies(&self, item: &str) -> Vec<String> {
        self.inner.read().closure(item, Direction::Incoming)
    }

    /// Items registered as depending directly on `target`
    #[must_use]
    pub fn direct_dependents(&self, target: &str) -> Vec<String> {
        let inner = self.inner.read();
        let Some(&idx) = inner.index.get(target) else {
            return Vec::new();
        };
        inner
            .neighbors(idx, Direction::Outgoing)
            .into_iter()
            .map(|n| inner.graph[n].clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, item: &str) -> bool {
        self.inner.read().index.contains_key(item)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }
}
