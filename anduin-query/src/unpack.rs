//! # Path unpacking
//!
//! The search settles over the contracted graph, so the meeting-node path
//! is a mix of original turn edges and shortcuts. This walks the parent
//! trees into a packed node sequence, then expands every shortcut through
//! its recorded middle node with an explicit stack (shortcut nesting on a
//! continental graph overflows the call stack).

use crate::Error;
use crate::scratch::SearchScratch;
use anduin_graph::edge::QueryEdgeData;
use anduin_graph::facade::GraphReader;
use anduin_graph::{EdgeWeight, INVALID_NODE, NodeId};

/// One original (non-shortcut) edge of the route, in travel order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnpackedEdge {
    pub original_edge_id: u32,
    pub weight: EdgeWeight,
}

/// Rebuilds the packed node sequence source→…→meeting→…→target from the
/// two parent trees.
pub fn reconstruct_packed_path(scratch: &SearchScratch, meeting_node: NodeId) -> Vec<NodeId> {
    let mut packed = Vec::new();
    let mut node = meeting_node;
    while node != INVALID_NODE {
        packed.push(node);
        node = scratch.forward.parent(node);
    }
    packed.reverse();
    let mut node = scratch.backward.parent(meeting_node);
    while node != INVALID_NODE {
        packed.push(node);
        node = scratch.backward.parent(node);
    }
    packed
}

/// The cheapest edge connecting `u` to `v` in real travel direction,
/// whichever endpoint's adjacency run it is stored in.
fn smallest_edge<F: GraphReader>(facade: &F, u: NodeId, v: NodeId) -> Option<QueryEdgeData> {
    let mut best: Option<QueryEdgeData> = None;
    let mut consider = |data: QueryEdgeData| {
        if best.is_none_or(|b| data.weight < b.weight) {
            best = Some(data);
        }
    };
    for e in facade.edge_range(u) {
        if facade.target(e) == v {
            let data = facade.edge_data(e);
            if data.forward {
                consider(data);
            }
        }
    }
    for e in facade.edge_range(v) {
        if facade.target(e) == u {
            let data = facade.edge_data(e);
            if data.backward {
                consider(data);
            }
        }
    }
    best
}

fn unpack_edge<F: GraphReader>(
    facade: &F,
    from: NodeId,
    to: NodeId,
    output: &mut Vec<UnpackedEdge>,
) -> Result<(), Error> {
    let mut stack = vec![(from, to)];
    while let Some((u, v)) = stack.pop() {
        let data = smallest_edge(facade, u, v).ok_or_else(|| {
            Error::DataCorruption(format!("no edge between {u} and {v} while unpacking"))
        })?;
        if data.shortcut {
            let middle = data.id;
            stack.push((middle, v));
            stack.push((u, middle));
        } else {
            output.push(UnpackedEdge {
                original_edge_id: data.id,
                weight: data.weight,
            });
        }
    }
    Ok(())
}

/// Expands a packed node path into the ordered original-edge sequence.
pub fn unpack_path<F: GraphReader>(
    facade: &F,
    packed: &[NodeId],
) -> Result<Vec<UnpackedEdge>, Error> {
    let mut output = Vec::new();
    for pair in packed.windows(2) {
        unpack_edge(facade, pair[0], pair[1], &mut output)?;
    }
    Ok(output)
}
