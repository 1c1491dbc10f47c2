//! # Route description
//!
//! Turns the unpacked edge sequence into what the client actually sees:
//! the compressed (or raw) geometry and the turn instruction list, with
//! roundabout exits counted along the ring.

use crate::phantom::PhantomNode;
use crate::unpack::UnpackedEdge;
use anduin_graph::facade::{CoordinateReader, NameReader};
use anduin_graph::{EdgeWeight, FixedCoordinate, TurnInstruction, polyline};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryFormat {
    /// Google polyline v5 string.
    Polyline,
    /// Raw JSON array of [lat, lon] pairs.
    Unencoded,
}

#[derive(Serialize, Debug)]
pub struct Instruction {
    pub instruction: u8,
    pub street_name: String,
    /// Index into the geometry where this instruction applies.
    pub position: usize,
    /// Exit number, only present for leave-roundabout instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_number: Option<u32>,
}

pub struct RouteDescription {
    pub coordinates: Vec<FixedCoordinate>,
    pub instructions: Vec<Instruction>,
    pub total_weight: EdgeWeight,
    pub start_name: String,
    pub end_name: String,
}

impl RouteDescription {
    /// Assembles geometry and instructions for one route leg.
    ///
    /// Geometry is the source foot, each turn's via node, and the target
    /// foot. Instructions are emitted where the turn code is interesting:
    /// plain same-road continuations are folded away, and each roundabout
    /// leave carries the number of exits passed since entering.
    pub fn build<F: CoordinateReader + NameReader>(
        facade: &F,
        source: &PhantomNode,
        target: &PhantomNode,
        edges: &[UnpackedEdge],
        total_weight: EdgeWeight,
    ) -> Self {
        let mut coordinates = Vec::with_capacity(edges.len() + 2);
        coordinates.push(source.location);

        let mut instructions = Vec::new();
        let mut exits_since_enter: Option<u32> = None;
        for edge in edges {
            let turn = facade.turn_data(edge.original_edge_id);
            let position = coordinates.len();
            coordinates.push(facade.via_coordinate(edge.original_edge_id));

            match turn.turn_instruction {
                TurnInstruction::NoTurn => {}
                TurnInstruction::EnterRoundabout => {
                    exits_since_enter = Some(0);
                    instructions.push(Instruction {
                        instruction: turn.turn_instruction.into(),
                        street_name: facade.name(turn.name_id).to_string(),
                        position,
                        exit_number: None,
                    });
                }
                TurnInstruction::StayOnRoundabout => {
                    // Passing an exit on the ring; no instruction of its own.
                    if let Some(exits) = exits_since_enter.as_mut() {
                        *exits += 1;
                    }
                }
                TurnInstruction::LeaveRoundabout => {
                    let exit_number = exits_since_enter.take().map(|exits| exits + 1);
                    instructions.push(Instruction {
                        instruction: turn.turn_instruction.into(),
                        street_name: facade.name(turn.name_id).to_string(),
                        position,
                        exit_number,
                    });
                }
                other => {
                    instructions.push(Instruction {
                        instruction: other.into(),
                        street_name: facade.name(turn.name_id).to_string(),
                        position,
                        exit_number: None,
                    });
                }
            }
        }
        coordinates.push(target.location);

        let start_name = facade.name(source.name_id).to_string();
        let end_name = facade.name(target.name_id).to_string();
        Self {
            coordinates,
            instructions,
            total_weight,
            start_name,
            end_name,
        }
    }

    pub fn geometry(&self, format: GeometryFormat) -> Value {
        match format {
            GeometryFormat::Polyline => Value::String(polyline::encode(&self.coordinates)),
            GeometryFormat::Unencoded => polyline::to_json_array(&self.coordinates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anduin_graph::edge::OriginalEdgeData;
    use anduin_graph::{INVALID_NODE, NodeId};

    struct FakeFacade {
        turns: Vec<OriginalEdgeData>,
        coordinates: Vec<FixedCoordinate>,
    }

    impl CoordinateReader for FakeFacade {
        fn turn_data(&self, id: u32) -> OriginalEdgeData {
            self.turns[id as usize]
        }

        fn via_coordinate(&self, id: u32) -> FixedCoordinate {
            self.coordinates[self.turns[id as usize].via_node as usize]
        }
    }

    impl NameReader for FakeFacade {
        fn name(&self, name_id: u32) -> &str {
            match name_id {
                0 => "Ring Road",
                1 => "Exit Street",
                _ => "",
            }
        }
    }

    fn turn(via: NodeId, name_id: u32, instruction: TurnInstruction) -> OriginalEdgeData {
        OriginalEdgeData {
            via_node: via,
            name_id,
            turn_instruction: instruction,
            traffic_signal: false,
        }
    }

    fn phantom_at(lat: i32, lon: i32) -> PhantomNode {
        PhantomNode {
            forward_node: 0,
            reverse_node: INVALID_NODE,
            name_id: 0,
            forward_weight: 1,
            reverse_weight: 1,
            forward_offset: 0,
            reverse_offset: 0,
            location: FixedCoordinate::new(lat, lon),
            distance_meters: 0.0,
        }
    }

    #[test]
    fn roundabout_exits_are_counted() {
        let facade = FakeFacade {
            turns: vec![
                turn(0, 0, TurnInstruction::EnterRoundabout),
                turn(1, 0, TurnInstruction::StayOnRoundabout),
                turn(2, 0, TurnInstruction::StayOnRoundabout),
                turn(3, 1, TurnInstruction::LeaveRoundabout),
            ],
            coordinates: (0..4).map(|i| FixedCoordinate::new(i * 10, 0)).collect(),
        };
        let edges: Vec<UnpackedEdge> = (0..4)
            .map(|id| UnpackedEdge { original_edge_id: id, weight: 1 })
            .collect();
        let description = RouteDescription::build(
            &facade,
            &phantom_at(0, -10),
            &phantom_at(0, 40),
            &edges,
            4,
        );
        assert_eq!(description.instructions.len(), 2);
        assert_eq!(
            description.instructions[1].instruction,
            u8::from(TurnInstruction::LeaveRoundabout)
        );
        assert_eq!(description.instructions[1].exit_number, Some(3));
        assert_eq!(description.instructions[1].street_name, "Exit Street");
        // Geometry: source foot + 4 via nodes + target foot.
        assert_eq!(description.coordinates.len(), 6);
    }

    #[test]
    fn plain_continuations_produce_no_instruction() {
        let facade = FakeFacade {
            turns: vec![turn(0, 0, TurnInstruction::NoTurn)],
            coordinates: vec![FixedCoordinate::new(5, 5)],
        };
        let edges = [UnpackedEdge { original_edge_id: 0, weight: 2 }];
        let description =
            RouteDescription::build(&facade, &phantom_at(0, 0), &phantom_at(10, 10), &edges, 2);
        assert!(description.instructions.is_empty());
        assert_eq!(description.coordinates.len(), 3);
    }
}
