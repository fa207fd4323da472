//! Artifact dependency graph and ancestor closure

use std::collections::{BTreeSet, VecDeque};

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use strata_artifact::ArtifactId;

use crate::error::GraphError;

/// Kind of relation an edge records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Parent summary was generated from the child summary
    #[default]
    Aggregation,
}

/// One parent -> child edge
///
/// Used only for cascade traversal; carries no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub parent: ArtifactId,
    pub child: ArtifactId,
    #[serde(default)]
    pub relation: Relation,
}

impl DependencyEdge {
    /// Aggregation edge
    #[inline]
    #[must_use]
    pub fn aggregation(parent: ArtifactId, child: ArtifactId) -> Self {
        Self {
            parent,
            child,
            relation: Relation::Aggregation,
        }
    }
}

/// Parent -> child dependency graph between artifacts
///
/// Not synchronized: owners keep it behind the same lock as the rows it
/// describes so that edge updates and invalidations commit together.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    inner: DiGraphMap<ArtifactId, Relation>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a list of edges
    ///
    /// # Errors
    /// Fails on the first edge that would close a cycle.
    pub fn from_edges<I>(edges: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = DependencyEdge>,
    {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge.parent, edge.child)?;
        }
        Ok(graph)
    }

    pub fn add_node(&mut self, id: ArtifactId) {
        self.inner.add_node(id);
    }

    #[must_use]
    pub fn contains(&self, id: ArtifactId) -> bool {
        self.inner.contains_node(id)
    }

    /// Record that `parent` aggregates `child`
    ///
    /// # Errors
    /// Rejects self loops and edges that would close a cycle.
    pub fn add_edge(&mut self, parent: ArtifactId, child: ArtifactId) -> Result<(), GraphError> {
        if parent == child {
            return Err(GraphError::SelfLoop(parent));
        }
        if self.inner.contains_node(parent)
            && self.inner.contains_node(child)
            && has_path_connecting(&self.inner, child, parent, None)
        {
            return Err(GraphError::CycleDetected { parent, child });
        }
        self.inner.add_edge(parent, child, Relation::Aggregation);
        Ok(())
    }

    /// Replace every outgoing edge of `parent`
    ///
    /// On error the previous edge set is restored.
    ///
    /// # Errors
    /// Same as [`DependencyGraph::add_edge`].
    pub fn replace_children<I>(&mut self, parent: ArtifactId, children: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = ArtifactId>,
    {
        let previous = self.children(parent);
        self.clear_children(parent);
        self.inner.add_node(parent);

        for child in children {
            if let Err(err) = self.add_edge(parent, child) {
                self.clear_children(parent);
                for old in previous {
                    self.inner.add_edge(parent, old, Relation::Aggregation);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop every outgoing edge of `parent`
    pub fn clear_children(&mut self, parent: ArtifactId) {
        for child in self.children(parent) {
            self.inner.remove_edge(parent, child);
        }
    }

    /// Direct children of a node
    #[must_use]
    pub fn children(&self, id: ArtifactId) -> Vec<ArtifactId> {
        if !self.inner.contains_node(id) {
            return Vec::new();
        }
        self.inner.neighbors_directed(id, Direction::Outgoing).collect()
    }

    /// Direct parents of a node
    #[must_use]
    pub fn parents(&self, id: ArtifactId) -> Vec<ArtifactId> {
        if !self.inner.contains_node(id) {
            return Vec::new();
        }
        self.inner.neighbors_directed(id, Direction::Incoming).collect()
    }

    /// Transitive closure of parents reachable from `id`, excluding `id`
    ///
    /// Explicit worklist over adjacency lookups; no recursion.
    ///
    /// # Errors
    /// [`GraphError::CycleReachable`] if the walk returns to `id`.
    pub fn ancestors(&self, id: ArtifactId) -> Result<BTreeSet<ArtifactId>, GraphError> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ArtifactId> = self.parents(id).into();

        while let Some(next) = queue.pop_front() {
            if next == id {
                tracing::error!(artifact = %id, "dependency cycle detected during ancestor walk");
                return Err(GraphError::CycleReachable(id));
            }
            if seen.insert(next) {
                queue.extend(self.parents(next));
            }
        }

        Ok(seen)
    }

    /// Union of the given roots and all of their ancestors
    ///
    /// # Errors
    /// Propagates [`GraphError::CycleReachable`].
    pub fn closure<I>(&self, roots: I) -> Result<BTreeSet<ArtifactId>, GraphError>
    where
        I: IntoIterator<Item = ArtifactId>,
    {
        let mut out = BTreeSet::new();
        for root in roots {
            if out.contains(&root) {
                continue;
            }
            let ancestors = self.ancestors(root)?;
            out.insert(root);
            out.extend(ancestors);
        }
        Ok(out)
    }

    /// All edges, sorted for stable output
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .inner
            .all_edges()
            .map(|(parent, child, relation)| DependencyEdge {
                parent,
                child,
                relation: *relation,
            })
            .collect();
        edges.sort_by_key(|e| (e.parent, e.child));
        edges
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }
}
