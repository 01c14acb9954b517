// mpck-core/src/components.rs
//! Must-link graph and neighborhood extraction
//!
//! A neighborhood is a connected component of the undirected graph whose
//! edges are the must-link constraints. Instances without any must-link edge
//! do not form a neighborhood on their own.
//!
//! Traversal uses an explicit work stack, so deep constraint chains do not
//! hit recursion limits.

use log::{debug, trace};

use crate::constraints::{ConstraintStore, LinkType};

/// Adjacency lists over instance indices, must-link edges only.
#[derive(Debug, Clone)]
pub struct MustLinkGraph {
    adj: Vec<Vec<usize>>,
}

impl MustLinkGraph {
    /// Build the graph for `n_instances` nodes. Constraints referencing
    /// indices `>= n_instances` are ignored.
    pub fn from_store(n_instances: usize, store: &ConstraintStore) -> Self {
        let mut adj = vec![Vec::new(); n_instances];
        for c in store.iter().filter(|c| c.link == LinkType::MustLink) {
            if c.second >= n_instances {
                continue;
            }
            if !adj[c.first].contains(&c.second) {
                adj[c.first].push(c.second);
            }
            if !adj[c.second].contains(&c.first) {
                adj[c.second].push(c.first);
            }
        }
        Self { adj }
    }

    pub fn n_nodes(&self) -> usize {
        self.adj.len()
    }

    pub fn neighbors(&self, u: usize) -> &[usize] {
        &self.adj[u]
    }

    pub fn has_edges(&self, u: usize) -> bool {
        !self.adj[u].is_empty()
    }

    pub fn n_edges(&self) -> usize {
        self.adj.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Connected components of nodes with at least one edge, in discovery
    /// order. Members of each component are sorted ascending.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.n_nodes();
        let mut visited = vec![false; n];
        let mut components = Vec::new();
        let mut stack = Vec::new();

        for root in 0..n {
            if visited[root] || !self.has_edges(root) {
                continue;
            }

            let mut members = Vec::new();
            visited[root] = true;
            stack.push(root);

            while let Some(u) = stack.pop() {
                members.push(u);
                for &v in self.neighbors(u) {
                    if !visited[v] {
                        visited[v] = true;
                        stack.push(v);
                    }
                }
            }

            members.sort_unstable();
            trace!("Component rooted at {}: {} members", root, members.len());
            components.push(members);
        }

        components
    }
}

/// A connected component of the must-link graph
#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhood {
    pub members: Vec<usize>,
}

impl Neighborhood {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.members.binary_search(&idx).is_ok()
    }
}

/// Neighborhoods sorted by descending size. Ties keep discovery order, so
/// the result is deterministic for a given store.
pub fn must_link_neighborhoods(n_instances: usize, store: &ConstraintStore) -> Vec<Neighborhood> {
    let graph = MustLinkGraph::from_store(n_instances, store);
    let mut neighborhoods: Vec<Neighborhood> = graph
        .components()
        .into_iter()
        .map(|members| Neighborhood { members })
        .collect();

    neighborhoods.sort_by(|a, b| b.len().cmp(&a.len()));

    debug!(
        "Must-link graph: {} edges, {} neighborhoods (largest={})",
        graph.n_edges(),
        neighborhoods.len(),
        neighborhoods.first().map_or(0, Neighborhood::len)
    );

    neighborhoods
}
