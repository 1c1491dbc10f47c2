//! # Per-thread search scratch
//!
//! A bidirectional search needs two heaps and two distance/parent tables
//! sized to the node count. Allocating those per query would dominate small
//! queries, so each worker thread keeps one scratch bundle in a pool keyed
//! by thread id, and clears only the entries it touched (the dirty list)
//! rather than the whole table.

use anduin_graph::{EdgeWeight, INVALID_NODE, INVALID_WEIGHT, NodeId};
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::thread::ThreadId;

/// One direction's working state.
pub struct HalfScratch {
    pub heap: BinaryHeap<Reverse<(EdgeWeight, NodeId)>>,
    distance: Vec<EdgeWeight>,
    parent: Vec<NodeId>,
    dirty: Vec<NodeId>,
}

impl HalfScratch {
    fn new(node_count: u32) -> Self {
        Self {
            heap: BinaryHeap::new(),
            distance: vec![INVALID_WEIGHT; node_count as usize],
            parent: vec![INVALID_NODE; node_count as usize],
            dirty: Vec::new(),
        }
    }

    pub fn distance(&self, node: NodeId) -> EdgeWeight {
        self.distance[node as usize]
    }

    pub fn parent(&self, node: NodeId) -> NodeId {
        self.parent[node as usize]
    }

    pub fn is_reached(&self, node: NodeId) -> bool {
        self.distance[node as usize] != INVALID_WEIGHT
    }

    /// Records a tentative distance and pushes the node onto the heap.
    pub fn update(&mut self, node: NodeId, distance: EdgeWeight, parent: NodeId) {
        if self.distance[node as usize] == INVALID_WEIGHT {
            self.dirty.push(node);
        }
        self.distance[node as usize] = distance;
        self.parent[node as usize] = parent;
        self.heap.push(Reverse((distance, node)));
    }

    /// Every node the last search touched, in first-touch order.
    pub fn touched(&self) -> &[NodeId] {
        &self.dirty
    }

    fn reset(&mut self) {
        for &node in &self.dirty {
            self.distance[node as usize] = INVALID_WEIGHT;
            self.parent[node as usize] = INVALID_NODE;
        }
        self.dirty.clear();
        self.heap.clear();
    }
}

pub struct SearchScratch {
    pub forward: HalfScratch,
    pub backward: HalfScratch,
}

impl SearchScratch {
    pub fn new(node_count: u32) -> Self {
        Self {
            forward: HalfScratch::new(node_count),
            backward: HalfScratch::new(node_count),
        }
    }

    pub fn reset(&mut self) {
        self.forward.reset();
        self.backward.reset();
    }
}

/// Pool of scratch bundles, one per worker thread.
///
/// The entry is removed for the duration of the closure so no DashMap
/// shard lock is held while a search runs.
pub struct ScratchPool {
    slots: DashMap<ThreadId, Box<SearchScratch>>,
    node_count: u32,
}

impl ScratchPool {
    pub fn new(node_count: u32) -> Self {
        Self {
            slots: DashMap::new(),
            node_count,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SearchScratch) -> R) -> R {
        let thread = std::thread::current().id();
        let mut scratch = self
            .slots
            .remove(&thread)
            .map_or_else(|| Box::new(SearchScratch::new(self.node_count)), |(_, s)| s);
        scratch.reset();
        let result = f(&mut scratch);
        self.slots.insert(thread, scratch);
        result
    }
}
