//! Import-time and query-time edge records shared across the workspace.

use crate::coordinate::FixedCoordinate;
use crate::turn_instruction::TurnInstruction;
use crate::{EdgeWeight, NodeId};
use enumset::{EnumSet, EnumSetType};

/// Per-edge boolean attributes from the import stage.
///
/// Stored as a set; the importer can combine these freely, subject to the
/// canonicalization rules in the edge-based graph factory.
#[derive(Debug, EnumSetType)]
pub enum ImportFlag {
    /// Traversable in source→target direction.
    Forward,
    /// Traversable in target→source direction.
    Backward,
    /// Part of a roundabout ring.
    Roundabout,
    /// Excluded from the spatial index (and thus from snapping).
    IgnoreInGrid,
    /// Access-restricted road (destination traffic only and similar).
    AccessRestricted,
    /// Contra-flow lane for some mode.
    ContraFlow,
}

/// Broad road classification carried through from tag extraction.
///
/// The engine only needs it for turn-instruction heuristics, so the set is
/// deliberately coarse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RoadClass {
    Major,
    #[default]
    Minor,
    Link,
    Service,
}

/// A directed-or-bidirectional edge as handed over by the importer.
#[derive(Clone, Debug)]
pub struct ImportEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: EdgeWeight,
    pub name_id: u32,
    pub class: RoadClass,
    pub flags: EnumSet<ImportFlag>,
}

/// External node record: stable importer id plus position.
#[derive(Clone, Copy, Debug)]
pub struct NodeEntry {
    pub external_id: u32,
    pub coordinate: FixedCoordinate,
}

/// A turn restriction (from, via, to). `is_only` inverts the meaning:
/// the turn is mandatory rather than forbidden.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnRestriction {
    pub from: NodeId,
    pub via: NodeId,
    pub to: NodeId,
    pub is_only: bool,
}

/// Edge payload of the contracted query graph, in working (unpacked) form.
///
/// `id` is the contracted middle node for shortcuts and the original-edge id
/// otherwise. The packed 16-byte wire twin lives in [`crate::files`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryEdgeData {
    pub weight: EdgeWeight,
    pub id: u32,
    pub shortcut: bool,
    pub forward: bool,
    pub backward: bool,
}

/// A node of the edge-based graph: one directed segment of the road network.
#[derive(Clone, Copy, Debug)]
pub struct EdgeBasedNode {
    pub id: u32,
    pub source_coordinate: FixedCoordinate,
    pub target_coordinate: FixedCoordinate,
    pub name_id: u32,
    pub weight: EdgeWeight,
    pub tiny_component: bool,
    pub ignore_in_grid: bool,
}

/// An edge of the edge-based graph: one legal turn between two directed
/// segments. `edge_id` indexes the [`OriginalEdgeData`] record emitted
/// alongside it.
#[derive(Clone, Copy, Debug)]
pub struct EdgeBasedEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_id: u32,
    pub weight: EdgeWeight,
    pub forward: bool,
    pub backward: bool,
}

/// Per-turn sidecar data persisted to `.edges` and consulted when a route
/// description is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OriginalEdgeData {
    pub via_node: NodeId,
    pub name_id: u32,
    pub turn_instruction: TurnInstruction,
    pub traffic_signal: bool,
}

/// An undirected road segment paired with the edge-based nodes representing
/// its two traversal directions. These are the leaves of the spatial index.
#[derive(Clone, Copy, Debug)]
pub struct SegmentRecord {
    pub u: NodeId,
    pub v: NodeId,
    pub u_coordinate: FixedCoordinate,
    pub v_coordinate: FixedCoordinate,
    /// Edge-based node traversing u→v, if that direction is routable.
    pub forward_node: NodeId,
    /// Edge-based node traversing v→u, if that direction is routable.
    pub reverse_node: NodeId,
    pub forward_weight: EdgeWeight,
    pub reverse_weight: EdgeWeight,
    pub name_id: u32,
    pub tiny_component: bool,
}
