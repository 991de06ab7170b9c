//! Dependency graph over records waiting to be pushed.
//!
//! An edge `A → B` means B has to reach the server before A may be pushed.
//! The graph is built fresh for every push phase and only shrinks:
//!
//! ```text
//!             ready_keys()              remove / remove_branch
//!  from_nodes ───────────► push wave ────────────────────────► (repeat until empty)
//! ```
//!
//! Only edges between nodes present in the graph matter. A dependency that
//! is absent (already on the server, or not eligible for push) is treated
//! as satisfied.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// A node that can be placed in a [`DependencyGraph`].
pub trait GraphNode {
    /// Identity of the node.
    type Key: Copy + Ord + Debug;

    /// Returns the node's key.
    fn key(&self) -> Self::Key;

    /// Returns the keys of the nodes this one depends on.
    fn dependencies(&self) -> Vec<Self::Key>;
}

impl GraphNode for tally_core::Record {
    type Key = tally_core::LocalId;

    fn key(&self) -> Self::Key {
        tally_core::Syncable::local_id(self)
    }

    fn dependencies(&self) -> Vec<Self::Key> {
        tally_core::Syncable::dependencies(self)
    }
}

/// Directed dependency graph.
///
/// Iteration order is by key, so the ready frontier is deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph<N: GraphNode> {
    nodes: BTreeMap<N::Key, N>,
    /// Outgoing edges: node → nodes it depends on.
    depends_on: BTreeMap<N::Key, BTreeSet<N::Key>>,
    /// Incoming edges: node → nodes depending on it.
    dependents: BTreeMap<N::Key, BTreeSet<N::Key>>,
}

impl<N: GraphNode> DependencyGraph<N> {
    /// Builds a graph from a flat collection of nodes.
    ///
    /// If two nodes share a key the later one wins. Self-dependencies are
    /// ignored.
    pub fn from_nodes(nodes: impl IntoIterator<Item = N>) -> Self {
        let nodes: BTreeMap<N::Key, N> = nodes.into_iter().map(|n| (n.key(), n)).collect();

        let mut depends_on: BTreeMap<N::Key, BTreeSet<N::Key>> = BTreeMap::new();
        let mut dependents: BTreeMap<N::Key, BTreeSet<N::Key>> = BTreeMap::new();
        for (key, node) in &nodes {
            let edges: BTreeSet<N::Key> = node
                .dependencies()
                .into_iter()
                .filter(|dep| dep != key && nodes.contains_key(dep))
                .collect();
            for dep in &edges {
                dependents.entry(*dep).or_default().insert(*key);
            }
            depends_on.insert(*key, edges);
        }

        Self {
            nodes,
            depends_on,
            dependents,
        }
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes remain.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the node is still in the graph.
    pub fn contains(&self, key: &N::Key) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns a node by key.
    pub fn get(&self, key: &N::Key) -> Option<&N> {
        self.nodes.get(key)
    }

    /// Keys of all nodes without unresolved dependencies.
    ///
    /// Empty exactly when the graph is empty, unless the remaining nodes
    /// form a cycle.
    pub fn ready_keys(&self) -> Vec<N::Key> {
        self.depends_on
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(key, _)| *key)
            .collect()
    }

    /// All nodes without unresolved dependencies.
    pub fn ready_nodes(&self) -> Vec<&N> {
        self.ready_keys()
            .iter()
            .filter_map(|key| self.nodes.get(key))
            .collect()
    }

    /// Removes exactly one node and its edges.
    ///
    /// Nodes that depended on it lose that dependency.
    pub fn remove(&mut self, key: &N::Key) -> Option<N> {
        let node = self.nodes.remove(key)?;

        if let Some(deps) = self.depends_on.remove(key) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(key);
                }
            }
        }
        if let Some(children) = self.dependents.remove(key) {
            for child in children {
                if let Some(set) = self.depends_on.get_mut(&child) {
                    set.remove(key);
                }
            }
        }

        Some(node)
    }

    /// Removes a node together with every node that transitively depends
    /// on it.
    ///
    /// Returns the removed nodes, the starting node first.
    pub fn remove_branch(&mut self, key: &N::Key) -> Vec<N> {
        if !self.nodes.contains_key(key) {
            return Vec::new();
        }

        let mut branch = vec![*key];
        let mut seen: BTreeSet<N::Key> = BTreeSet::from([*key]);
        let mut cursor = 0;
        while cursor < branch.len() {
            if let Some(children) = self.dependents.get(&branch[cursor]) {
                for child in children {
                    if seen.insert(*child) {
                        branch.push(*child);
                    }
                }
            }
            cursor += 1;
        }

        branch.iter().filter_map(|k| self.remove(k)).collect()
    }
}
