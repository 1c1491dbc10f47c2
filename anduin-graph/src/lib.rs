//! # Anduin core graph library
//!
//! Data structures shared by the preprocessing and query sides of the engine:
//! fixed-point coordinates, the segmented bulk vector, the static (CSR) and
//! dynamic adjacency graphs, the polyline codec, the Hilbert-packed R-tree,
//! the persisted dataset formats, and the read facades over them.

pub mod coordinate;
pub mod dynamic_graph;
pub mod edge;
pub mod facade;
pub mod files;
pub mod polyline;
pub mod rtree;
pub mod segmented_vector;
pub mod static_graph;
pub mod turn_instruction;

// Re-exports for the types that appear in nearly every signature downstream.
// The module tree is deep enough that forcing callers through it adds noise.
pub use coordinate::{COORDINATE_PRECISION, FixedCoordinate};
pub use edge::{ImportEdge, ImportFlag, NodeEntry, QueryEdgeData, TurnRestriction};
pub use segmented_vector::SegmentedVector;
pub use turn_instruction::TurnInstruction;

/// Dense node identifier, valid within a single dataset.
pub type NodeId = u32;

/// Dense edge identifier, valid within a single graph.
pub type EdgeId = u32;

/// Edge weight in deci-seconds (or whatever unit the profile emitted).
///
/// Signed because phantom-node seeding uses negative initial distances;
/// see the bidirectional search for the accounting.
pub type EdgeWeight = i32;

pub const INVALID_NODE: NodeId = u32::MAX;
pub const INVALID_EDGE: EdgeId = u32::MAX;
pub const INVALID_WEIGHT: EdgeWeight = i32::MAX;

/// Helpers for moving between native integers and zerocopy's endian-aware
/// wrappers inside `bitfield` field conversions.
pub mod le_bits {
    pub mod conv_u32le {
        use zerocopy::{LE, U32};
        pub const fn from_inner(n: u32) -> U32<LE> {
            U32::<LE>::new(n)
        }
        pub const fn into_inner(v: U32<LE>) -> u32 {
            v.get()
        }
    }
}
