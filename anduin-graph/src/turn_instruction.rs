//! Turn instruction codes and the bearing-band classifier.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Discrete turn instruction attached to every edge of the edge-based graph.
///
/// The numeric values are part of the `.edges` wire format; never reorder.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum TurnInstruction {
    NoTurn = 0,
    GoStraight = 1,
    TurnSlightRight = 2,
    TurnRight = 3,
    TurnSharpRight = 4,
    UTurn = 5,
    TurnSharpLeft = 6,
    TurnLeft = 7,
    TurnSlightLeft = 8,
    EnterRoundabout = 9,
    StayOnRoundabout = 10,
    LeaveRoundabout = 11,
}

impl TurnInstruction {
    /// Classifies a planar turn angle (180° = straight ahead, see
    /// [`crate::coordinate::angle_between`]) into a direction band.
    ///
    /// Band edges sit at 23°, 67°, and 113°, mirrored about the straight
    /// axis. Angles near 0/360 are reversals.
    pub fn from_angle(angle: f64) -> Self {
        match angle {
            a if (23.0..67.0).contains(&a) => Self::TurnSharpRight,
            a if (67.0..113.0).contains(&a) => Self::TurnRight,
            a if (113.0..158.0).contains(&a) => Self::TurnSlightRight,
            a if (158.0..202.0).contains(&a) => Self::GoStraight,
            a if (202.0..247.0).contains(&a) => Self::TurnSlightLeft,
            a if (247.0..293.0).contains(&a) => Self::TurnLeft,
            a if (293.0..337.0).contains(&a) => Self::TurnSharpLeft,
            _ => Self::UTurn,
        }
    }

    pub fn is_roundabout(self) -> bool {
        matches!(
            self,
            Self::EnterRoundabout | Self::StayOnRoundabout | Self::LeaveRoundabout
        )
    }
}
