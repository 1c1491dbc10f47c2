//! # Contraction hierarchy construction
//!
//! Nodes are contracted in priority order, in rounds: each round extracts
//! an independent set (no two members within two hops), simulates every
//! member's contraction in parallel against the frozen round graph, then
//! applies the results serially in id order. Contracting a node removes its
//! incoming adjacency mirror entries, freezing its own run as its upward
//! edge set; where removing it would break a unique shortest path, a
//! shortcut through it is inserted instead.
//!
//! The process is deterministic: identical input produces an identical
//! edge set, rank assignment, and (downstream) persisted bytes.

use crate::PrepareError;
use anduin_graph::dynamic_graph::DynamicGraph;
use anduin_graph::edge::{EdgeBasedEdge, QueryEdgeData};
use anduin_graph::static_graph::{InputEdge, StaticGraph};
use anduin_graph::{EdgeWeight, NodeId, SegmentedVector};
use bit_set::BitSet;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Bounded witness search: give up after this many hops.
const WITNESS_HOP_LIMIT: u32 = 5;

/// Priority weights. Edge difference dominates; the rest break ties toward
/// spreading contraction evenly through the graph.
const EDGE_DIFFERENCE_FACTOR: i64 = 8;
const CONTRACTED_NEIGHBOR_FACTOR: i64 = 2;
const ORIGINAL_EDGE_FACTOR: i64 = 1;
const DEPTH_FACTOR: i64 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ContractorEdgeData {
    weight: EdgeWeight,
    /// Original-edge id, or the middle node once `shortcut` is set.
    id: u32,
    original_edges: u32,
    shortcut: bool,
    forward: bool,
    backward: bool,
}

#[derive(Clone, Debug)]
struct Shortcut {
    from: NodeId,
    to: NodeId,
    weight: EdgeWeight,
    middle: NodeId,
    original_edges: u32,
}

pub struct ContractionResult {
    pub graph: StaticGraph<QueryEdgeData>,
    /// Contraction order per node; strictly increasing over rounds.
    pub ranks: Vec<u32>,
}

pub struct Contractor {
    graph: DynamicGraph<ContractorEdgeData>,
}

impl Contractor {
    /// Builds the working graph from the edge-based edge list, consuming it
    /// block by block. Every directed edge gets a mirror entry at its
    /// target so both search directions see the full adjacency.
    pub fn new(node_count: u32, edges: &mut SegmentedVector<EdgeBasedEdge>) -> Self {
        let mut records: Vec<InputEdge<ContractorEdgeData>> = Vec::with_capacity(edges.len() * 2);
        edges.consume_to(|edge| {
            records.push(InputEdge {
                source: edge.source,
                target: edge.target,
                data: ContractorEdgeData {
                    weight: edge.weight,
                    id: edge.edge_id,
                    original_edges: 1,
                    shortcut: false,
                    forward: edge.forward,
                    backward: edge.backward,
                },
            });
            records.push(InputEdge {
                source: edge.target,
                target: edge.source,
                data: ContractorEdgeData {
                    weight: edge.weight,
                    id: edge.edge_id,
                    original_edges: 1,
                    shortcut: false,
                    forward: edge.backward,
                    backward: edge.forward,
                },
            });
        });
        records.sort_by(|a, b| {
            (a.source, a.target, a.data.weight, a.data.id).cmp(&(
                b.source,
                b.target,
                b.data.weight,
                b.data.id,
            ))
        });
        // Merge orientation twins of the same underlying edge.
        let mut merged: Vec<InputEdge<ContractorEdgeData>> = Vec::with_capacity(records.len());
        for record in records {
            if let Some(last) = merged.last_mut() {
                if last.source == record.source
                    && last.target == record.target
                    && last.data.weight == record.data.weight
                    && last.data.id == record.data.id
                    && last.data.shortcut == record.data.shortcut
                {
                    last.data.forward |= record.data.forward;
                    last.data.backward |= record.data.backward;
                    continue;
                }
            }
            merged.push(record);
        }
        Self {
            graph: DynamicGraph::from_sorted_edges(node_count, &merged),
        }
    }

    /// Bounded forward Dijkstra from `from`, avoiding `via`, over the live
    /// graph. Returns true if some path to `to` of weight at most `cap`
    /// exists, making the candidate shortcut redundant.
    fn has_witness(&self, from: NodeId, to: NodeId, via: NodeId, cap: EdgeWeight) -> bool {
        let mut distance: HashMap<NodeId, EdgeWeight> = HashMap::new();
        let mut heap: BinaryHeap<Reverse<(EdgeWeight, u32, NodeId)>> = BinaryHeap::new();
        distance.insert(from, 0);
        heap.push(Reverse((0, 0, from)));
        while let Some(Reverse((weight, hops, node))) = heap.pop() {
            if weight > cap {
                return false;
            }
            if node == to {
                return true;
            }
            if distance.get(&node).is_some_and(|&d| d < weight) || hops == WITNESS_HOP_LIMIT {
                continue;
            }
            for e in self.graph.edge_range(node) {
                let data = self.graph.data(e);
                if !data.forward {
                    continue;
                }
                let next = self.graph.target(e);
                if next == via {
                    continue;
                }
                let next_weight = weight + data.weight;
                if next_weight <= cap
                    && distance.get(&next).is_none_or(|&d| next_weight < d)
                {
                    distance.insert(next, next_weight);
                    heap.push(Reverse((next_weight, hops + 1, next)));
                }
            }
        }
        false
    }

    /// Simulates contracting `node`: the shortcuts that would be inserted,
    /// without mutating the graph.
    fn simulate(&self, node: NodeId) -> Vec<Shortcut> {
        let mut shortcuts = Vec::new();
        for e_in in self.graph.edge_range(node) {
            let in_data = self.graph.data(e_in);
            if !in_data.backward {
                continue;
            }
            let from = self.graph.target(e_in);
            for e_out in self.graph.edge_range(node) {
                let out_data = self.graph.data(e_out);
                if !out_data.forward {
                    continue;
                }
                let to = self.graph.target(e_out);
                if to == from {
                    continue;
                }
                let weight = in_data.weight + out_data.weight;
                if !self.has_witness(from, to, node, weight) {
                    shortcuts.push(Shortcut {
                        from,
                        to,
                        weight,
                        middle: node,
                        original_edges: in_data.original_edges + out_data.original_edges,
                    });
                }
            }
        }
        shortcuts
    }

    fn evaluate_priority(
        &self,
        node: NodeId,
        contracted_neighbors: &[u32],
        depth: &[u32],
    ) -> i64 {
        let shortcuts = self.simulate(node);
        let removed = i64::from(self.graph.out_degree(node)) * 2;
        let added = shortcuts.len() as i64 * 2;
        let original_through: i64 = self
            .graph
            .edge_range(node)
            .map(|e| i64::from(self.graph.data(e).original_edges))
            .sum();
        EDGE_DIFFERENCE_FACTOR * (added - removed)
            + CONTRACTED_NEIGHBOR_FACTOR * i64::from(contracted_neighbors[node as usize])
            + ORIGINAL_EDGE_FACTOR * original_through
            + DEPTH_FACTOR * i64::from(depth[node as usize])
    }

    /// A node joins the round's independent set iff no live node within two
    /// hops has a better (priority, id) pair.
    fn is_independent(&self, node: NodeId, priority: &[i64]) -> bool {
        let beats = |other: NodeId| {
            (priority[other as usize], other) < (priority[node as usize], node)
        };
        for e in self.graph.edge_range(node) {
            let neighbor = self.graph.target(e);
            if beats(neighbor) {
                return false;
            }
            for e2 in self.graph.edge_range(neighbor) {
                let second = self.graph.target(e2);
                if second != node && beats(second) {
                    return false;
                }
            }
        }
        true
    }

    fn insert_or_merge(&mut self, from: NodeId, to: NodeId, data: ContractorEdgeData) {
        for e in self.graph.edge_range(from) {
            if self.graph.target(e) == to {
                let existing = self.graph.data(e);
                if existing.weight == data.weight
                    && existing.shortcut == data.shortcut
                    && existing.id == data.id
                {
                    let existing = self.graph.data_mut(e);
                    existing.forward |= data.forward;
                    existing.backward |= data.backward;
                    return;
                }
            }
        }
        self.graph.insert_edge(from, to, data);
    }

    /// Runs the contraction to completion.
    ///
    /// `cancel` is checked between rounds; preprocessing has no other
    /// suspension points.
    pub fn run(mut self, cancel: Option<&AtomicBool>) -> Result<ContractionResult, PrepareError> {
        let node_count = self.graph.num_nodes();
        let n = node_count as usize;
        let mut contracted = BitSet::with_capacity(n);
        let mut contracted_neighbors = vec![0u32; n];
        let mut depth = vec![0u32; n];
        let mut ranks = vec![0u32; n];
        let mut next_rank = 0u32;

        let mut remaining: Vec<NodeId> = (0..node_count).collect();
        let mut priority: Vec<i64> = vec![0; n];
        let initial: Vec<i64> = remaining
            .par_iter()
            .map(|&v| self.evaluate_priority(v, &contracted_neighbors, &depth))
            .collect();
        for (&v, p) in remaining.iter().zip(initial) {
            priority[v as usize] = p;
        }

        let mut round = 0u32;
        while !remaining.is_empty() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(PrepareError::Cancelled);
            }
            round += 1;

            let selected: Vec<NodeId> = remaining
                .par_iter()
                .copied()
                .filter(|&v| self.is_independent(v, &priority))
                .collect();
            debug_assert!(!selected.is_empty(), "the priority minimum is always independent");

            let plans: Vec<(NodeId, Vec<Shortcut>)> = selected
                .par_iter()
                .map(|&v| (v, self.simulate(v)))
                .collect();

            let mut dirty = BitSet::with_capacity(n);
            for (v, shortcuts) in plans {
                // Remove the mirrors pointing at v; v's own run freezes as
                // its upward edge set.
                let mut neighbors: Vec<NodeId> =
                    self.graph.edge_range(v).map(|e| self.graph.target(e)).collect();
                neighbors.sort_unstable();
                neighbors.dedup();
                for &x in &neighbors {
                    self.graph.delete_edges_to(x, v);
                    contracted_neighbors[x as usize] += 1;
                    depth[x as usize] = depth[x as usize].max(depth[v as usize] + 1);
                    dirty.insert(x as usize);
                }
                for shortcut in shortcuts {
                    let template = ContractorEdgeData {
                        weight: shortcut.weight,
                        id: shortcut.middle,
                        original_edges: shortcut.original_edges,
                        shortcut: true,
                        forward: true,
                        backward: false,
                    };
                    self.insert_or_merge(shortcut.from, shortcut.to, template.clone());
                    self.insert_or_merge(
                        shortcut.to,
                        shortcut.from,
                        ContractorEdgeData {
                            forward: false,
                            backward: true,
                            ..template
                        },
                    );
                    dirty.insert(shortcut.from as usize);
                    dirty.insert(shortcut.to as usize);
                }
                contracted.insert(v as usize);
                ranks[v as usize] = next_rank;
                next_rank += 1;
            }

            remaining.retain(|&v| !contracted.contains(v as usize));
            let to_refresh: Vec<NodeId> = remaining
                .iter()
                .copied()
                .filter(|&v| dirty.contains(v as usize))
                .collect();
            let refreshed: Vec<i64> = to_refresh
                .par_iter()
                .map(|&v| self.evaluate_priority(v, &contracted_neighbors, &depth))
                .collect();
            for (&v, p) in to_refresh.iter().zip(refreshed) {
                priority[v as usize] = p;
            }
            debug!(
                "contraction round {round}: {} contracted, {} remaining",
                next_rank,
                remaining.len()
            );
        }

        // Every node's frozen run is its upward edge set; collect them all.
        let mut output: Vec<InputEdge<QueryEdgeData>> = Vec::new();
        for node in 0..node_count {
            for e in self.graph.edge_range(node) {
                let data = self.graph.data(e);
                output.push(InputEdge {
                    source: node,
                    target: self.graph.target(e),
                    data: QueryEdgeData {
                        weight: data.weight,
                        id: data.id,
                        shortcut: data.shortcut,
                        forward: data.forward,
                        backward: data.backward,
                    },
                });
            }
        }
        output.sort_by_key(|e| (e.source, e.target, e.data.weight, e.data.id));
        info!(
            "contracted {} nodes in {} rounds, {} edges in the search graph",
            node_count,
            round,
            output.len()
        );
        Ok(ContractionResult {
            graph: StaticGraph::from_sorted_edges(node_count, &output),
            ranks,
        })
    }
}
