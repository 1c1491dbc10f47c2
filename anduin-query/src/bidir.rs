//! # Bidirectional hierarchy search
//!
//! Two Dijkstra frontiers over the contracted graph: the forward search
//! relaxes edges flagged `forward`, the backward search edges flagged
//! `backward`. Because contraction kept only edges toward later-contracted
//! nodes, both searches climb the hierarchy and meet near the top; the
//! node minimizing the summed distances closes the route.
//!
//! ## Weight accounting
//!
//! Every edge of the turn graph charges the weight of the segment being
//! *entered* plus the turn penalty. A route therefore pays for each segment
//! it enters but not for the one it starts on, and pays its final segment
//! in full rather than up to the stop position. Phantom seeding repairs
//! both ends: the forward search starts at `segment_weight − offset`
//! (the unpaid remainder of the first segment) and the backward search at
//! `offset − segment_weight` (refunding the overshoot past the stop).
//! The backward seed can be negative; distances are signed throughout.

use crate::Error;
use crate::phantom::PhantomNode;
use crate::scratch::{HalfScratch, SearchScratch};
use anduin_graph::facade::GraphReader;
use anduin_graph::{EdgeWeight, INVALID_NODE, INVALID_WEIGHT, NodeId};
use std::cmp::Reverse;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub weight: EdgeWeight,
    pub meeting_node: NodeId,
}

/// Seeds for one search direction: node and initial distance.
pub type Seed = (NodeId, EdgeWeight);

pub fn forward_seeds(phantom: &PhantomNode) -> Vec<Seed> {
    let mut seeds = Vec::with_capacity(2);
    if phantom.forward_node != INVALID_NODE {
        seeds.push((
            phantom.forward_node,
            phantom.forward_weight - phantom.forward_offset,
        ));
    }
    if phantom.reverse_node != INVALID_NODE {
        seeds.push((
            phantom.reverse_node,
            phantom.reverse_weight - phantom.reverse_offset,
        ));
    }
    seeds
}

pub fn backward_seeds(phantom: &PhantomNode) -> Vec<Seed> {
    let mut seeds = Vec::with_capacity(2);
    if phantom.forward_node != INVALID_NODE {
        seeds.push((
            phantom.forward_node,
            phantom.forward_offset - phantom.forward_weight,
        ));
    }
    if phantom.reverse_node != INVALID_NODE {
        seeds.push((
            phantom.reverse_node,
            phantom.reverse_offset - phantom.reverse_weight,
        ));
    }
    seeds
}

/// Stall-on-demand: skip expanding `node` if some already-reached neighbor
/// reaches it more cheaply through a downward edge. Such a node can never
/// lie on a shortest up-down path, so expanding it is wasted work.
fn is_stalled<F: GraphReader>(
    facade: &F,
    half: &HalfScratch,
    forward: bool,
    node: NodeId,
    distance: EdgeWeight,
) -> bool {
    for e in facade.edge_range(node) {
        let data = facade.edge_data(e);
        let downward = if forward { data.backward } else { data.forward };
        if !downward {
            continue;
        }
        let neighbor = facade.target(e);
        if half.is_reached(neighbor) && half.distance(neighbor) + data.weight < distance {
            return true;
        }
    }
    false
}

fn routing_step<F: GraphReader>(
    facade: &F,
    own: &mut HalfScratch,
    other: &HalfScratch,
    forward: bool,
    other_floor: EdgeWeight,
    best: &mut EdgeWeight,
    meeting: &mut NodeId,
) {
    let Some(Reverse((distance, node))) = own.heap.pop() else {
        return;
    };
    if distance > own.distance(node) {
        // Superseded heap entry.
        return;
    }

    if other.is_reached(node) {
        let total = distance + other.distance(node);
        // Negative totals arise when both phantoms sit on one segment with
        // the target behind the source; such a "meeting" is not a path.
        if total < *best && total >= 0 {
            *best = total;
            *meeting = node;
        }
    }

    // The other side never reports less than its smallest seed (which is
    // negative for backward phantom seeds), so no meeting through this or
    // any later pop can improve on `best` once this holds.
    if *best != INVALID_WEIGHT && distance.saturating_add(other_floor) > *best {
        own.heap.clear();
        return;
    }

    if is_stalled(facade, own, forward, node, distance) {
        return;
    }

    for e in facade.edge_range(node) {
        let data = facade.edge_data(e);
        let valid = if forward { data.forward } else { data.backward };
        if !valid {
            continue;
        }
        let next = facade.target(e);
        let next_distance = distance + data.weight;
        if !own.is_reached(next) || next_distance < own.distance(next) {
            own.update(next, next_distance, node);
        }
    }
}

/// Core search over explicit seed lists. Returns the best meeting, if any.
pub fn search<F: GraphReader>(
    facade: &F,
    scratch: &mut SearchScratch,
    forward_seeds: &[Seed],
    backward_seeds: &[Seed],
) -> Option<SearchResult> {
    for &(node, distance) in forward_seeds {
        scratch.forward.update(node, distance, INVALID_NODE);
    }
    for &(node, distance) in backward_seeds {
        scratch.backward.update(node, distance, INVALID_NODE);
    }
    let forward_floor = forward_seeds.iter().map(|&(_, d)| d).min().unwrap_or(0);
    let backward_floor = backward_seeds.iter().map(|&(_, d)| d).min().unwrap_or(0);

    let mut best = INVALID_WEIGHT;
    let mut meeting = INVALID_NODE;
    while !scratch.forward.heap.is_empty() || !scratch.backward.heap.is_empty() {
        routing_step(
            facade,
            &mut scratch.forward,
            &scratch.backward,
            true,
            backward_floor,
            &mut best,
            &mut meeting,
        );
        routing_step(
            facade,
            &mut scratch.backward,
            &scratch.forward,
            false,
            forward_floor,
            &mut best,
            &mut meeting,
        );
    }

    if meeting == INVALID_NODE {
        None
    } else {
        Some(SearchResult {
            weight: best,
            meeting_node: meeting,
        })
    }
}

/// Point-to-point query between two phantom nodes.
pub fn shortest_path<F: GraphReader>(
    facade: &F,
    scratch: &mut SearchScratch,
    source: &PhantomNode,
    target: &PhantomNode,
) -> Result<SearchResult, Error> {
    if !source.is_valid() || !target.is_valid() {
        return Err(Error::NoRoute);
    }
    search(
        facade,
        scratch,
        &forward_seeds(source),
        &backward_seeds(target),
    )
    .ok_or(Error::NoRoute)
}
