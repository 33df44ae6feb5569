//! Registration graph built from stos records.
//!
//! Each slice is a node and each record is an edge `slice0 -> slice1`
//! (parent to child) whose transform maps parent coordinates into child
//! coordinates. A usable graph is a single tree: one root with no incoming
//! edge and every other slice reachable from it along exactly one path.
//!
//! ```text
//!            A            roots_found == 1
//!          /   \
//!         B     D         cascade(A, C) = [T(A->B), T(B->C)]
//!         |               cascade(C, A) = [inv T(B->C), inv T(A->B)]
//!         C
//! ```
//!
//! Nodes live in an arena indexed by position in lexical name order, so
//! "sorted by name" and "sorted by index" coincide.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::error::RegistrationError;
use crate::format::StosRecord;
use crate::transform::Transform;

/// A slice in the registration graph.
#[derive(Debug, Clone)]
pub struct SliceNode {
    pub name: String,
    /// Index into [`StosForest::records`] of the edge governing this slice
    pub incoming: Option<usize>,
    /// Child node indices, in name order
    pub children: Vec<usize>,
    parent: Option<usize>,
}

/// A slice visited in dependency order.
#[derive(Debug, Clone, Copy)]
pub struct DependencyEntry<'a> {
    pub slice: &'a str,
    /// Distance from the root
    pub depth: usize,
    /// Edge registering this slice to its parent, `None` for roots
    pub edge: Option<&'a StosRecord>,
}

/// Forest of slices resolved from pairwise records.
#[derive(Debug, Clone)]
pub struct StosForest {
    records: Vec<StosRecord>,
    nodes: Vec<SliceNode>,
    index: BTreeMap<String, usize>,
    roots: Vec<usize>,
    ambiguous: BTreeSet<usize>,
}

impl StosForest {
    /// Build the forest and classify it.
    ///
    /// A slice named as `slice1` by more than one record, a self-edge, or a
    /// slice on a cycle marks the graph ambiguous. Only the first record
    /// naming a slice as `slice1` becomes its incoming edge.
    pub fn build(records: Vec<StosRecord>) -> Self {
        let names: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| [r.slice0.as_str(), r.slice1.as_str()])
            .collect();
        let index: BTreeMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let mut nodes: Vec<SliceNode> = index
            .keys()
            .map(|name| SliceNode {
                name: name.clone(),
                incoming: None,
                children: Vec::new(),
                parent: None,
            })
            .collect();

        let mut ambiguous = BTreeSet::new();
        for (edge, record) in records.iter().enumerate() {
            let parent = index[&record.slice0];
            let child = index[&record.slice1];
            if parent == child || nodes[child].incoming.is_some() {
                ambiguous.insert(child);
                continue;
            }
            nodes[child].incoming = Some(edge);
            nodes[child].parent = Some(parent);
        }

        for child in 0..nodes.len() {
            if let Some(parent) = nodes[child].parent {
                nodes[parent].children.push(child);
            }
        }

        let roots: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].incoming.is_none())
            .collect();

        let mut forest = Self {
            records,
            nodes,
            index,
            roots,
            ambiguous,
        };

        // Slices never reached from a root sit on a cycle.
        let reached: HashSet<usize> = forest.preorder().into_iter().map(|(n, _)| n).collect();
        for node in 0..forest.nodes.len() {
            if !reached.contains(&node) {
                forest.ambiguous.insert(node);
            }
        }

        debug!(
            slices = forest.nodes.len(),
            edges = forest.records.len(),
            roots = forest.roots.len(),
            ambiguous = forest.ambiguous.len(),
            "built registration graph"
        );
        forest
    }

    /// Number of independent trees, or 0 when the graph is ambiguous.
    pub fn roots_found(&self) -> usize {
        if self.ambiguous.is_empty() {
            self.roots.len()
        } else {
            0
        }
    }

    /// Require exactly one tree and return its root.
    pub fn require_single_tree(&self) -> Result<&str, RegistrationError> {
        match self.roots_found() {
            1 => Ok(&self.nodes[self.roots[0]].name),
            0 => Err(RegistrationError::AmbiguousRegistration {
                slices: self.ambiguous_slices(),
            }),
            _ => Err(RegistrationError::DisjointRegistration {
                roots: self.root_names(),
            }),
        }
    }

    /// Slices involved in a cycle or reachable along several paths.
    pub fn ambiguous_slices(&self) -> Vec<String> {
        self.ambiguous
            .iter()
            .map(|&i| self.nodes[i].name.clone())
            .collect()
    }

    pub fn root_names(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|&i| self.nodes[i].name.clone())
            .collect()
    }

    pub fn records(&self) -> &[StosRecord] {
        &self.records
    }

    pub fn slice_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, slice: &str) -> Option<&SliceNode> {
        self.index.get(slice).map(|&i| &self.nodes[i])
    }

    /// The record registering `slice` to its parent.
    pub fn incoming(&self, slice: &str) -> Option<&StosRecord> {
        self.node(slice)
            .and_then(|n| n.incoming)
            .map(|edge| &self.records[edge])
    }

    /// Whether the slice image is mirrored before registration.
    ///
    /// Taken from the governing edge, or for a root from the first record
    /// that names it as `slice0`.
    pub fn is_flipped(&self, slice: &str) -> bool {
        match self.incoming(slice) {
            Some(record) => record.flipped1,
            None => self
                .records
                .iter()
                .find(|r| r.slice0 == slice)
                .map(|r| r.flipped0)
                .unwrap_or(false),
        }
    }

    /// Pixel spacing recorded for the slice, defaulting to 1.
    pub fn pixel_spacing(&self, slice: &str) -> f64 {
        self.incoming(slice)
            .or_else(|| self.records.iter().find(|r| r.slice0 == slice))
            .map(|r| r.pixel_spacing)
            .unwrap_or(1.0)
    }

    /// Preorder walk from every root, children in name order.
    fn preorder(&self) -> Vec<(usize, usize)> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (r, 0)).collect();
        let mut seen = HashSet::new();
        while let Some((node, depth)) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            order.push((node, depth));
            for &child in self.nodes[node].children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        order
    }

    /// Every reachable slice, each after all slices on its path to the
    /// root. Siblings are visited in lexical order.
    pub fn collect_in_dependency_order(&self) -> Vec<DependencyEntry<'_>> {
        self.preorder()
            .into_iter()
            .map(|(node, depth)| DependencyEntry {
                slice: &self.nodes[node].name,
                depth,
                edge: self.nodes[node].incoming.map(|e| &self.records[e]),
            })
            .collect()
    }

    /// Node indices from `node` up to its root, inclusive.
    fn path_to_root(&self, node: usize) -> Option<Vec<usize>> {
        let mut path = vec![node];
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            if path.len() > self.nodes.len() {
                return None;
            }
            path.push(parent);
            current = parent;
        }
        Some(path)
    }

    /// Transforms mapping `from` coordinates into `to` coordinates, in
    /// application order.
    ///
    /// Walks up from `from` to the lowest common ancestor using inverted
    /// edge transforms, then down to `to` using the edges as recorded. A
    /// cascade from the root therefore contains no inverses. Empty when
    /// `from == to`.
    pub fn get_cascade(&self, from: &str, to: &str) -> Result<Vec<Transform>, RegistrationError> {
        let &from_idx = self
            .index
            .get(from)
            .ok_or_else(|| RegistrationError::UnknownSlice(from.to_string()))?;
        let &to_idx = self
            .index
            .get(to)
            .ok_or_else(|| RegistrationError::UnknownSlice(to.to_string()))?;
        let no_path = || RegistrationError::NoPath {
            from: from.to_string(),
            to: to.to_string(),
        };

        let up = self.path_to_root(from_idx).ok_or_else(no_path)?;
        let down = self.path_to_root(to_idx).ok_or_else(no_path)?;
        let down_set: HashSet<usize> = down.iter().copied().collect();

        let lca_pos = up
            .iter()
            .position(|n| down_set.contains(n))
            .ok_or_else(no_path)?;
        let lca = up[lca_pos];

        let mut cascade = Vec::new();
        for &node in &up[..lca_pos] {
            let edge = self.nodes[node].incoming.ok_or_else(no_path)?;
            cascade.push(self.records[edge].transform.inverted());
        }

        let lca_down = down.iter().position(|&n| n == lca).ok_or_else(no_path)?;
        for &node in down[..lca_down].iter().rev() {
            let edge = self.nodes[node].incoming.ok_or_else(no_path)?;
            cascade.push(self.records[edge].transform.clone());
        }

        Ok(cascade)
    }
}

// =============================================================================
// Tests
// =============================================================================
