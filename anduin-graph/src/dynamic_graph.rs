//! # Dynamic adjacency graph
//!
//! The mutable graph used during edge-based construction and contraction.
//! Each node owns one contiguous run of the edge array; insertion grows the
//! run by consuming adjacent dummy slots or relocating the run to the tail,
//! and deletion swaps with the run's last edge and dummies out the vacancy.
//!
//! Invariant: every slot inside a node's `[first_edge, first_edge + count)`
//! run is live; every slot outside all runs is a dummy.

use crate::static_graph::InputEdge;
use crate::{EdgeId, INVALID_NODE, NodeId};

#[derive(Clone, Copy, Debug)]
struct NodeSlot {
    first_edge: EdgeId,
    count: u32,
}

#[derive(Clone, Debug)]
struct EdgeSlot<D> {
    target: NodeId,
    data: D,
}

pub struct DynamicGraph<D> {
    nodes: Vec<NodeSlot>,
    edges: Vec<EdgeSlot<D>>,
    num_edges: u32,
}

impl<D: Clone + Default> DynamicGraph<D> {
    /// Constructs an empty graph with `node_count` isolated nodes.
    pub fn new(node_count: u32) -> Self {
        Self {
            nodes: vec![NodeSlot { first_edge: 0, count: 0 }; node_count as usize],
            edges: Vec::new(),
            num_edges: 0,
        }
    }

    /// Builds from an edge list sorted by (source, target).
    pub fn from_sorted_edges(node_count: u32, input: &[InputEdge<D>]) -> Self {
        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut edge = 0usize;
        for node in 0..node_count {
            let first = edge;
            while edge < input.len() && input[edge].source == node {
                edge += 1;
            }
            nodes.push(NodeSlot {
                first_edge: first as u32,
                count: (edge - first) as u32,
            });
        }
        assert_eq!(edge, input.len(), "edge list not sorted by source");
        let edges = input
            .iter()
            .map(|e| EdgeSlot { target: e.target, data: e.data.clone() })
            .collect();
        Self {
            nodes,
            edges,
            num_edges: input.len() as u32,
        }
    }

    pub fn num_nodes(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn num_edges(&self) -> u32 {
        self.num_edges
    }

    pub fn out_degree(&self, n: NodeId) -> u32 {
        self.nodes[n as usize].count
    }

    pub fn begin_edges(&self, n: NodeId) -> EdgeId {
        self.nodes[n as usize].first_edge
    }

    pub fn end_edges(&self, n: NodeId) -> EdgeId {
        let slot = self.nodes[n as usize];
        slot.first_edge + slot.count
    }

    pub fn edge_range(&self, n: NodeId) -> std::ops::Range<EdgeId> {
        self.begin_edges(n)..self.end_edges(n)
    }

    pub fn target(&self, e: EdgeId) -> NodeId {
        self.edges[e as usize].target
    }

    pub fn data(&self, e: EdgeId) -> &D {
        &self.edges[e as usize].data
    }

    pub fn data_mut(&mut self, e: EdgeId) -> &mut D {
        &mut self.edges[e as usize].data
    }

    fn is_dummy(&self, e: usize) -> bool {
        self.edges[e].target == INVALID_NODE
    }

    fn make_dummy(&mut self, e: usize) {
        self.edges[e].target = INVALID_NODE;
    }

    /// Adds an edge. Invalidates edge ids previously obtained for `from`;
    /// ids for other nodes remain stable.
    pub fn insert_edge(&mut self, from: NodeId, to: NodeId, data: D) -> EdgeId {
        let node = self.nodes[from as usize];
        let one_past = (node.first_edge + node.count) as usize;
        if one_past == self.edges.len() || !self.is_dummy(one_past) {
            if node.first_edge > 0 && self.is_dummy(node.first_edge as usize - 1) {
                // Grow leftward into the adjacent dummy.
                let node = &mut self.nodes[from as usize];
                node.first_edge -= 1;
                let first = node.first_edge as usize;
                let count = node.count as usize;
                self.edges[first] = self.edges[first + count].clone();
            } else {
                // Relocate the whole run to the tail, leaving slack.
                let new_first = self.edges.len() as u32;
                let new_size = node.count + (node.count / 8) + 2;
                self.edges.resize(
                    self.edges.len() + new_size as usize,
                    EdgeSlot { target: INVALID_NODE, data: D::default() },
                );
                for i in 0..node.count {
                    let src = (node.first_edge + i) as usize;
                    self.edges[new_first as usize + i as usize] = self.edges[src].clone();
                    self.make_dummy(src);
                }
                self.nodes[from as usize].first_edge = new_first;
            }
        }
        let node = self.nodes[from as usize];
        let slot = (node.first_edge + node.count) as usize;
        self.edges[slot] = EdgeSlot { target: to, data };
        self.nodes[from as usize].count += 1;
        self.num_edges += 1;
        slot as u32
    }

    /// Removes the edge `e` belonging to `source` by swapping in the run's
    /// last live edge. Invalidates edge ids for `source`.
    pub fn delete_edge(&mut self, source: NodeId, e: EdgeId) {
        let node = &mut self.nodes[source as usize];
        debug_assert!(e >= node.first_edge && e < node.first_edge + node.count);
        node.count -= 1;
        self.num_edges -= 1;
        let last = (node.first_edge + node.count) as usize;
        self.edges[e as usize] = self.edges[last].clone();
        self.make_dummy(last);
    }

    /// Removes every edge source→target. Returns how many were removed.
    pub fn delete_edges_to(&mut self, source: NodeId, target: NodeId) -> u32 {
        let mut deleted = 0;
        let mut e = self.begin_edges(source);
        while e < self.end_edges(source) {
            if self.target(e) == target {
                self.delete_edge(source, e);
                deleted += 1;
            } else {
                e += 1;
            }
        }
        deleted
    }

    /// Finds any edge from→to. Absence is the only "failure" and is encoded
    /// as `None`.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        self.edge_range(from).find(|&e| self.target(e) == to)
    }

    #[cfg(test)]
    fn assert_run_invariant(&self) {
        let mut live = vec![false; self.edges.len()];
        for n in 0..self.num_nodes() {
            for e in self.edge_range(n) {
                assert!(
                    !self.is_dummy(e as usize),
                    "dummy slot inside the run of node {n}"
                );
                live[e as usize] = true;
            }
        }
        for (i, &l) in live.iter().enumerate() {
            if !l {
                assert!(self.is_dummy(i), "live edge slot {i} outside every run");
            }
        }
    }
}
