//! Directed links between outputs
//!
//! A link `A → B` makes every route change on output A follow to the same
//! route on output B. Links compose transitively and may form cycles; the
//! propagation traversal visits each output at most once per change.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised when editing links
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Cannot link Out{} to itself", .0 + 1)]
    SelfLoop(usize),

    #[error("No such output: Out{}", .0 + 1)]
    UnknownOutput(usize),
}

/// A directed link between two outputs (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEdge {
    pub source: usize,
    pub target: usize,
}

impl LinkEdge {
    pub fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }
}

/// Output link graph, edges kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkGraph {
    edges: Vec<LinkEdge>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `source → target`; returns `false` if the edge already existed
    pub fn add_link(&mut self, source: usize, target: usize) -> Result<bool, GraphError> {
        if source == target {
            return Err(GraphError::SelfLoop(source));
        }
        let edge = LinkEdge::new(source, target);
        if self.edges.contains(&edge) {
            return Ok(false);
        }
        self.edges.push(edge);
        debug!(source, target, "Outputs linked");
        Ok(true)
    }

    /// Remove `source → target`; returns `false` if there was no such edge
    pub fn remove_link(&mut self, source: usize, target: usize) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.source == source && e.target == target));
        let removed = self.edges.len() != before;
        if removed {
            debug!(source, target, "Outputs unlinked");
        }
        removed
    }

    pub fn is_linked(&self, source: usize, target: usize) -> bool {
        self.edges.contains(&LinkEdge::new(source, target))
    }

    /// Direct targets of `output`, in insertion order
    pub fn links_from(&self, output: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.source == output)
            .map(|e| e.target)
            .collect()
    }

    pub fn edges(&self) -> &[LinkEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Replace the whole edge set
    ///
    /// All edges are checked first; on error the current edges are kept.
    /// Duplicates in `edges` collapse to one.
    pub fn replace(&mut self, edges: &[LinkEdge]) -> Result<(), GraphError> {
        if let Some(edge) = edges.iter().find(|e| e.source == e.target) {
            return Err(GraphError::SelfLoop(edge.source));
        }
        let mut fresh: Vec<LinkEdge> = Vec::with_capacity(edges.len());
        for edge in edges {
            if !fresh.contains(edge) {
                fresh.push(*edge);
            }
        }
        self.edges = fresh;
        debug!(count = self.edges.len(), "Links replaced");
        Ok(())
    }

    /// Every output a change at `origin` must be copied to
    ///
    /// Breadth-first over outward edges with a visited set, so each reachable
    /// output appears exactly once and cycles terminate. `origin` itself is
    /// never part of the result.
    pub fn propagation(&self, origin: usize) -> Vec<usize> {
        let mut visited = HashSet::from([origin]);
        let mut frontier = VecDeque::from([origin]);
        let mut reached = Vec::new();

        while let Some(node) = frontier.pop_front() {
            for target in self.edges.iter().filter(|e| e.source == node).map(|e| e.target) {
                if visited.insert(target) {
                    reached.push(target);
                    frontier.push_back(target);
                }
            }
        }

        trace!(origin, reached = ?reached, "Propagation set computed");
        reached
    }
}
