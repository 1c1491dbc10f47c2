//! # Phantom nodes
//!
//! A query coordinate rarely falls on a junction; it is snapped to the
//! nearest routable segment and represented as a synthetic "phantom" node:
//! the pair of edge-based nodes covering the segment's two directions plus
//! the weight already consumed up to the projected foot. The graph itself
//! is never mutated.

use crate::Error;
use anduin_graph::facade::SpatialReader;
use anduin_graph::rtree::NearestSegment;
use anduin_graph::{EdgeWeight, FixedCoordinate, INVALID_NODE, NodeId};

#[derive(Clone, Copy, Debug)]
pub struct PhantomNode {
    /// Edge-based node traversing the segment u→v; `INVALID_NODE` if that
    /// direction is not routable.
    pub forward_node: NodeId,
    /// Edge-based node traversing v→u.
    pub reverse_node: NodeId,
    pub name_id: u32,
    pub forward_weight: EdgeWeight,
    pub reverse_weight: EdgeWeight,
    /// Weight consumed from u to the foot, along the forward direction.
    pub forward_offset: EdgeWeight,
    /// Weight consumed from v to the foot, along the reverse direction.
    pub reverse_offset: EdgeWeight,
    /// The projected foot on the segment.
    pub location: FixedCoordinate,
    /// Snap distance in meters, for reply metadata.
    pub distance_meters: f64,
}

impl PhantomNode {
    fn from_segment(segment: &NearestSegment) -> Self {
        // Fixed-point split of the segment weight at the foot. The two
        // offsets deliberately use the same rounding so they sum to the
        // full weight only when both directions exist.
        let forward_offset = scaled_offset(segment.forward_weight, segment.ratio);
        let reverse_offset = scaled_offset(segment.reverse_weight, 1.0 - segment.ratio);
        Self {
            forward_node: segment.forward_node,
            reverse_node: segment.reverse_node,
            name_id: segment.name_id,
            forward_weight: segment.forward_weight,
            reverse_weight: segment.reverse_weight,
            forward_offset,
            reverse_offset,
            location: segment.foot,
            distance_meters: segment.distance_meters,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.forward_node != INVALID_NODE || self.reverse_node != INVALID_NODE
    }
}

fn scaled_offset(weight: EdgeWeight, ratio: f64) -> EdgeWeight {
    // Scale through i64 so large weights cannot overflow mid-multiply.
    let scaled = (i64::from(weight) * (ratio * 1024.0) as i64) / 1024;
    scaled as EdgeWeight
}

/// Snaps a raw input coordinate onto the road network.
///
/// Rejects out-of-range coordinates; reports `NoRoute` when the index has
/// no candidate (empty extract, or everything suppressed at this zoom).
pub fn resolve<F: SpatialReader>(
    facade: &F,
    coordinate: FixedCoordinate,
    zoom: u32,
) -> Result<PhantomNode, Error> {
    if !coordinate.is_valid() {
        return Err(Error::InvalidInput(format!(
            "coordinate ({}, {}) is out of range",
            coordinate.lat, coordinate.lon
        )));
    }
    let segment = facade
        .nearest_segment(coordinate, zoom)
        .map_err(|e| Error::DataCorruption(e.to_string()))?
        .ok_or(Error::NoRoute)?;
    Ok(PhantomNode::from_segment(&segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_with_ratio(ratio: f64) -> NearestSegment {
        NearestSegment {
            forward_node: 4,
            reverse_node: 5,
            name_id: 9,
            forward_weight: 100,
            reverse_weight: 100,
            u_coordinate: FixedCoordinate::new(0, 0),
            v_coordinate: FixedCoordinate::new(0, 1_000_000),
            foot: FixedCoordinate::new(0, (ratio * 1_000_000.0) as i32),
            ratio,
            distance_meters: 0.0,
        }
    }

    #[test]
    fn offsets_split_the_segment_weight() {
        let phantom = PhantomNode::from_segment(&segment_with_ratio(0.5));
        assert_eq!(phantom.forward_offset, 50);
        assert_eq!(phantom.reverse_offset, 50);

        let phantom = PhantomNode::from_segment(&segment_with_ratio(0.0));
        assert_eq!(phantom.forward_offset, 0);
        assert_eq!(phantom.reverse_offset, 100);

        let phantom = PhantomNode::from_segment(&segment_with_ratio(1.0));
        assert_eq!(phantom.forward_offset, 100);
        assert_eq!(phantom.reverse_offset, 0);
    }

    struct NoCandidates;

    impl SpatialReader for NoCandidates {
        fn nearest_segment(
            &self,
            _coordinate: FixedCoordinate,
            _zoom: u32,
        ) -> Result<Option<NearestSegment>, anduin_graph::rtree::RTreeError> {
            Ok(None)
        }
    }

    #[test]
    fn invalid_coordinate_is_invalid_input() {
        let result = resolve(&NoCandidates, FixedCoordinate::new(90_000_001, 0), 18);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn empty_index_is_no_route() {
        let result = resolve(&NoCandidates, FixedCoordinate::new(0, 0), 18);
        assert!(matches!(result, Err(Error::NoRoute)));
    }
}
