//! Connected-component sizing over the node-based graph.
//!
//! Disconnected scraps of road network (parking lots split off by data
//! errors, private estates) would otherwise swallow snapped coordinates at
//! low zoom levels. Components smaller than the configured threshold are
//! flagged so the spatial index can suppress them.

use anduin_graph::NodeId;
use anduin_graph::dynamic_graph::DynamicGraph;
use bit_set::BitSet;
use std::collections::VecDeque;
use tracing::debug;

/// Per-node component size, ignoring edge direction.
pub struct ComponentSizes {
    size_of_node: Vec<u32>,
}

impl ComponentSizes {
    /// BFS over the undirected view of `graph`. Directions are ignored
    /// because a one-way pair still forms one physical component.
    pub fn compute<D: Clone + Default>(graph: &DynamicGraph<D>) -> Self {
        let n = graph.num_nodes() as usize;

        // The graph stores one record per traversable direction; collect
        // the undirected adjacency once up front.
        let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for u in 0..graph.num_nodes() {
            for e in graph.edge_range(u) {
                let v = graph.target(e);
                adjacency[u as usize].push(v);
                adjacency[v as usize].push(u);
            }
        }

        let mut size_of_node = vec![0u32; n];
        let mut visited = BitSet::with_capacity(n);
        let mut queue = VecDeque::new();
        let mut component_count = 0u32;
        for start in 0..n {
            if visited.contains(start) {
                continue;
            }
            component_count += 1;
            let mut members = vec![start as NodeId];
            visited.insert(start);
            queue.push_back(start as NodeId);
            while let Some(node) = queue.pop_front() {
                for &next in &adjacency[node as usize] {
                    if !visited.contains(next as usize) {
                        visited.insert(next as usize);
                        members.push(next);
                        queue.push_back(next);
                    }
                }
            }
            let size = members.len() as u32;
            for member in members {
                size_of_node[member as usize] = size;
            }
        }
        debug!("found {component_count} components over {n} nodes");
        Self { size_of_node }
    }

    pub fn size_of(&self, node: NodeId) -> u32 {
        self.size_of_node[node as usize]
    }

    pub fn is_tiny(&self, node: NodeId, threshold: u32) -> bool {
        self.size_of_node[node as usize] < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anduin_graph::static_graph::InputEdge;

    #[test]
    fn sizes_ignore_direction() {
        // 0→1→2 one-way chain, plus an isolated pair 3↔4 and a loner 5.
        let edges = vec![
            InputEdge { source: 0, target: 1, data: () },
            InputEdge { source: 1, target: 2, data: () },
            InputEdge { source: 3, target: 4, data: () },
            InputEdge { source: 4, target: 3, data: () },
        ];
        let graph = DynamicGraph::from_sorted_edges(6, &edges);
        let components = ComponentSizes::compute(&graph);
        assert_eq!(components.size_of(0), 3);
        assert_eq!(components.size_of(2), 3);
        assert_eq!(components.size_of(3), 2);
        assert_eq!(components.size_of(5), 1);
        assert!(components.is_tiny(3, 3));
        assert!(!components.is_tiny(0, 3));
    }
}
