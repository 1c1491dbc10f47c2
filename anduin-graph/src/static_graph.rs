//! # Static CSR graph
//!
//! The immutable query-side graph. Nodes index into a compressed sparse row
//! offset array; out-edges of a node occupy one contiguous run of the edge
//! array. Built once from a sorted edge list, then never mutated.

use crate::{EdgeId, NodeId};

/// An input edge for graph construction. Must be sorted by (source, target)
/// before being handed to [`StaticGraph::from_sorted_edges`].
#[derive(Clone, Debug)]
pub struct InputEdge<D> {
    pub source: NodeId,
    pub target: NodeId,
    pub data: D,
}

#[derive(Clone, Copy, Debug)]
struct NodeSlot {
    first_edge: EdgeId,
}

#[derive(Clone, Debug)]
struct EdgeSlot<D> {
    target: NodeId,
    data: D,
}

pub struct StaticGraph<D> {
    nodes: Vec<NodeSlot>,
    edges: Vec<EdgeSlot<D>>,
}

impl<D: Clone> StaticGraph<D> {
    /// Builds the CSR arrays from an edge list sorted by (source, target).
    ///
    /// # Panics
    ///
    /// Panics if the list is not sorted by source or references a node id
    /// outside `0..node_count`.
    pub fn from_sorted_edges(node_count: u32, edges: &[InputEdge<D>]) -> Self {
        let mut nodes = Vec::with_capacity(node_count as usize + 1);
        let mut edge_index = 0u32;
        for node in 0..node_count {
            nodes.push(NodeSlot { first_edge: edge_index });
            while (edge_index as usize) < edges.len() && edges[edge_index as usize].source == node {
                edge_index += 1;
            }
        }
        assert_eq!(
            edge_index as usize,
            edges.len(),
            "edge list not sorted by source, or source id out of range"
        );
        nodes.push(NodeSlot { first_edge: edge_index });

        let edges = edges
            .iter()
            .map(|e| {
                assert!(e.target < node_count, "target id out of range");
                EdgeSlot {
                    target: e.target,
                    data: e.data.clone(),
                }
            })
            .collect();
        Self { nodes, edges }
    }

    /// Builds directly from pre-split CSR arrays (used by the dataset
    /// loader). `first_edges` must have one more entry than the node count.
    pub fn from_csr(first_edges: Vec<EdgeId>, targets_and_data: Vec<(NodeId, D)>) -> Self {
        assert!(!first_edges.is_empty());
        assert_eq!(
            *first_edges.last().unwrap() as usize,
            targets_and_data.len(),
            "CSR offset array does not close over the edge array"
        );
        Self {
            nodes: first_edges
                .into_iter()
                .map(|first_edge| NodeSlot { first_edge })
                .collect(),
            edges: targets_and_data
                .into_iter()
                .map(|(target, data)| EdgeSlot { target, data })
                .collect(),
        }
    }

    pub fn num_nodes(&self) -> u32 {
        (self.nodes.len() - 1) as u32
    }

    pub fn num_edges(&self) -> u32 {
        self.edges.len() as u32
    }

    pub fn out_degree(&self, n: NodeId) -> u32 {
        self.end_edges(n) - self.begin_edges(n)
    }

    pub fn begin_edges(&self, n: NodeId) -> EdgeId {
        self.nodes[n as usize].first_edge
    }

    pub fn end_edges(&self, n: NodeId) -> EdgeId {
        self.nodes[n as usize + 1].first_edge
    }

    /// Iterator over the out-edge ids of `n`.
    pub fn edge_range(&self, n: NodeId) -> std::ops::Range<EdgeId> {
        self.begin_edges(n)..self.end_edges(n)
    }

    pub fn target(&self, e: EdgeId) -> NodeId {
        self.edges[e as usize].target
    }

    pub fn data(&self, e: EdgeId) -> &D {
        &self.edges[e as usize].data
    }

    /// Linear scan for an edge u→v. Out-degrees in road graphs are tiny, so
    /// anything cleverer loses.
    pub fn find_edge(&self, u: NodeId, v: NodeId) -> Option<EdgeId> {
        self.edge_range(u).find(|&e| self.target(e) == v)
    }

    /// Looks for an edge between `u` and `v` in either direction, scanning
    /// the smaller adjacency run first. The flag in the result is true when
    /// the edge found runs v→u.
    pub fn find_edge_in_either_direction(&self, u: NodeId, v: NodeId) -> Option<(EdgeId, bool)> {
        if self.out_degree(u) <= self.out_degree(v) {
            self.find_edge(u, v)
                .map(|e| (e, false))
                .or_else(|| self.find_edge(v, u).map(|e| (e, true)))
        } else {
            self.find_edge(v, u)
                .map(|e| (e, true))
                .or_else(|| self.find_edge(u, v).map(|e| (e, false)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> StaticGraph<i32> {
        // 0 → 1 (10), 0 → 2 (20), 1 → 2 (5), 3 has no out-edges.
        let edges = vec![
            InputEdge { source: 0, target: 1, data: 10 },
            InputEdge { source: 0, target: 2, data: 20 },
            InputEdge { source: 1, target: 2, data: 5 },
        ];
        StaticGraph::from_sorted_edges(4, &edges)
    }

    #[test]
    fn csr_offsets() {
        let g = fixture();
        assert_eq!(g.num_nodes(), 4);
        assert_eq!(g.num_edges(), 3);
        assert_eq!(g.out_degree(0), 2);
        assert_eq!(g.out_degree(1), 1);
        assert_eq!(g.out_degree(2), 0);
        assert_eq!(g.out_degree(3), 0);
        assert_eq!(g.begin_edges(1), 2);
        assert_eq!(g.end_edges(1), 3);
    }

    #[test]
    fn find_edge_absence_is_none() {
        let g = fixture();
        assert_eq!(g.find_edge(0, 1), Some(0));
        assert_eq!(g.find_edge(1, 0), None);
        assert_eq!(g.find_edge(2, 3), None);
    }

    #[test]
    fn either_direction_reports_reversal() {
        let g = fixture();
        assert_eq!(g.find_edge_in_either_direction(0, 1), Some((0, false)));
        assert_eq!(g.find_edge_in_either_direction(1, 0), Some((0, true)));
        assert_eq!(g.find_edge_in_either_direction(2, 3), None);
    }

    #[test]
    fn from_csr_round_trips() {
        let g = fixture();
        let offsets: Vec<u32> = (0..=g.num_nodes()).map(|n| g.nodes[n as usize].first_edge).collect();
        let edges: Vec<(u32, i32)> = (0..g.num_edges()).map(|e| (g.target(e), *g.data(e))).collect();
        let rebuilt = StaticGraph::from_csr(offsets, edges);
        assert_eq!(rebuilt.num_nodes(), g.num_nodes());
        assert_eq!(rebuilt.find_edge(0, 2), Some(1));
    }
}
