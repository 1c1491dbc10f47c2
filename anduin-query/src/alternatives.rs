//! # Alternative routes
//!
//! After the main search, every node settled by both frontiers is a
//! potential "via" for a second route. A candidate survives if its total
//! weight stays within the stretch bound, it shares little enough of the
//! main route, and the stretch of road around the via node is itself a
//! shortest path (so the alternative does not zig-zag). At most one
//! alternative is returned.

use crate::bidir::{self, SearchResult};
use crate::scratch::SearchScratch;
use crate::unpack::{self, UnpackedEdge};
use anduin_graph::facade::GraphReader;
use anduin_graph::{EdgeWeight, NodeId};
use std::collections::HashSet;
use tracing::trace;

/// Accept via-weights up to (1 + ε) of the optimum; ε = 0.25.
const STRETCH_NUMERATOR: i64 = 5;
const STRETCH_DENOMINATOR: i64 = 4;
/// Reject candidates sharing more than γ of the optimum's weight; γ = 0.75.
const SHARING_NUMERATOR: i64 = 3;
const SHARING_DENOMINATOR: i64 = 4;
/// Candidates examined in detail before giving up.
const MAX_CANDIDATE_CHECKS: usize = 32;

pub struct Alternative {
    pub weight: EdgeWeight,
    pub edges: Vec<UnpackedEdge>,
}

/// Walks a parent chain from `meeting` and returns the packed path through
/// it (same shape as the main path's reconstruction).
fn packed_path_through(scratch: &SearchScratch, via: NodeId) -> Vec<NodeId> {
    unpack::reconstruct_packed_path(scratch, via)
}

/// Picks the node on the chain whose distance is within `limit` of the via
/// node's, as far from the via as possible: one endpoint of the local
/// optimality test window.
fn window_endpoint(
    chain: &[NodeId],
    distance_of: impl Fn(NodeId) -> EdgeWeight,
    via_distance: EdgeWeight,
    limit: EdgeWeight,
) -> NodeId {
    for &node in chain {
        if via_distance - distance_of(node) <= limit {
            return node;
        }
    }
    *chain.last().expect("chain contains at least the via node")
}

pub fn find_alternative<F: GraphReader>(
    facade: &F,
    scratch: &SearchScratch,
    best: SearchResult,
    main_edges: &[UnpackedEdge],
) -> Option<Alternative> {
    let max_via_weight =
        ((i64::from(best.weight) * STRETCH_NUMERATOR) / STRETCH_DENOMINATOR) as EdgeWeight;
    let max_sharing =
        ((i64::from(best.weight) * SHARING_NUMERATOR) / SHARING_DENOMINATOR) as EdgeWeight;
    let main_ids: HashSet<u32> = main_edges.iter().map(|e| e.original_edge_id).collect();

    // Every node both frontiers reached is a candidate via.
    let mut candidates: Vec<(EdgeWeight, NodeId)> = scratch
        .forward
        .touched()
        .iter()
        .copied()
        .filter(|&node| node != best.meeting_node && scratch.backward.is_reached(node))
        .map(|node| {
            (
                scratch.forward.distance(node) + scratch.backward.distance(node),
                node,
            )
        })
        .filter(|&(weight, _)| weight >= best.weight && weight <= max_via_weight)
        .collect();
    candidates.sort_unstable();

    let mut optimality_scratch: Option<SearchScratch> = None;
    for (via_weight, via) in candidates.into_iter().take(MAX_CANDIDATE_CHECKS) {
        let packed = packed_path_through(scratch, via);
        let Ok(edges) = unpack::unpack_path(facade, &packed) else {
            continue;
        };

        let sharing: EdgeWeight = edges
            .iter()
            .filter(|e| main_ids.contains(&e.original_edge_id))
            .map(|e| e.weight)
            .sum();
        if sharing > max_sharing {
            continue;
        }
        if edges.iter().map(|e| e.original_edge_id).eq(main_edges.iter().map(|e| e.original_edge_id)) {
            continue;
        }

        // Local optimality: the window of roughly T = w/4 on each side of
        // the via node must itself be a shortest path.
        let window = best.weight / 4;
        let via_forward = scratch.forward.distance(via);
        let via_backward = scratch.backward.distance(via);
        let split = packed.iter().position(|&n| n == via).unwrap_or(0);
        let (before, after) = packed.split_at(split);
        let mut before: Vec<NodeId> = before.to_vec();
        before.push(via);
        let window_start = window_endpoint(
            &before,
            |n| scratch.forward.distance(n),
            via_forward,
            window,
        );
        let mut after_rev: Vec<NodeId> = after.to_vec();
        after_rev.reverse();
        let window_end = window_endpoint(
            &after_rev,
            |n| scratch.backward.distance(n),
            via_backward,
            window,
        );
        let section_weight = (via_forward - scratch.forward.distance(window_start))
            + (via_backward - scratch.backward.distance(window_end));
        let check_scratch = optimality_scratch
            .get_or_insert_with(|| SearchScratch::new(facade.num_nodes()));
        check_scratch.reset();
        let optimal = bidir::search(
            facade,
            check_scratch,
            &[(window_start, 0)],
            &[(window_end, 0)],
        );
        if optimal.is_none_or(|r| r.weight < section_weight) {
            trace!("via {via} rejected: window not locally optimal");
            continue;
        }

        trace!("alternative via {via}, weight {via_weight}, sharing {sharing}");
        return Some(Alternative {
            weight: via_weight,
            edges,
        });
    }
    None
}
