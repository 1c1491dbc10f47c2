//! # Edge-based graph factory
//!
//! Rewrites the node-based road graph into the edge-based graph: every
//! directed road segment becomes a node, every legal turn becomes an edge
//! carrying the turn's weight and instruction. Turn restrictions, barrier
//! nodes, and traffic signals are folded in here, after which they are no
//! longer needed.

use crate::components::ComponentSizes;
use crate::restriction_map::RestrictionMap;
use crate::{PrepareConfig, PrepareError};
use anduin_graph::coordinate::angle_between;
use anduin_graph::dynamic_graph::DynamicGraph;
use anduin_graph::edge::{EdgeBasedEdge, EdgeBasedNode, OriginalEdgeData, RoadClass, SegmentRecord};
use anduin_graph::static_graph::InputEdge;
use anduin_graph::{
    EdgeWeight, FixedCoordinate, INVALID_NODE, ImportEdge, ImportFlag, NodeEntry, NodeId,
    SegmentedVector, TurnInstruction, TurnRestriction,
};
use bit_set::BitSet;
use itertools::Itertools;
use tracing::info;

/// Edge payload of the intermediate node-based graph. One record exists
/// per traversable direction.
#[derive(Clone, Debug, Default)]
struct NodeBasedEdgeData {
    weight: EdgeWeight,
    edge_based_node_id: u32,
    name_id: u32,
    class: RoadClass,
    roundabout: bool,
    ignore_in_grid: bool,
}

pub struct EdgeBasedGraphOutput {
    /// One node per directed segment.
    pub nodes: Vec<EdgeBasedNode>,
    /// One edge per legal turn; consumed by the contractor.
    pub edges: SegmentedVector<EdgeBasedEdge>,
    /// Per-turn sidecar records, indexed by `EdgeBasedEdge::edge_id`.
    pub original_edge_data: Vec<OriginalEdgeData>,
    /// Undirected segments for the spatial index.
    pub segments: Vec<SegmentRecord>,
    /// Number of distinct restriction entries that survived indexing.
    pub restriction_count: u32,
}

pub struct EdgeBasedGraphFactory<'a> {
    graph: DynamicGraph<NodeBasedEdgeData>,
    node_info: &'a [NodeEntry],
    restrictions: RestrictionMap,
    barrier_nodes: BitSet,
    traffic_lights: BitSet,
    components: ComponentSizes,
    segments: Vec<SegmentRecord>,
    edge_based_node_count: u32,
    config: PrepareConfig,
}

impl<'a> EdgeBasedGraphFactory<'a> {
    /// Canonicalizes the import edges and builds the node-based graph.
    ///
    /// Backward-only edges are flipped so that every stored record is
    /// traversable source→target; bidirectional edges produce two records,
    /// each with its own edge-based node id. Self-loops are dropped and
    /// weights clamped to at least one.
    pub fn new(
        node_count: u32,
        import_edges: Vec<ImportEdge>,
        barrier_node_list: &[NodeId],
        traffic_light_list: &[NodeId],
        restriction_list: &[TurnRestriction],
        node_info: &'a [NodeEntry],
        config: PrepareConfig,
    ) -> Result<Self, PrepareError> {
        if node_info.len() != node_count as usize {
            return Err(PrepareError::InvalidImport(format!(
                "{} nodes announced but {} node records given",
                node_count,
                node_info.len()
            )));
        }

        let mut restrictions = RestrictionMap::new();
        for restriction in restriction_list {
            restrictions.insert(restriction);
        }

        let mut barrier_nodes = BitSet::with_capacity(node_count as usize);
        for &node in barrier_node_list {
            barrier_nodes.insert(node as usize);
        }
        let mut traffic_lights = BitSet::with_capacity(node_count as usize);
        for &node in traffic_light_list {
            traffic_lights.insert(node as usize);
        }

        let mut records: Vec<InputEdge<NodeBasedEdgeData>> = Vec::new();
        let mut segments: Vec<SegmentRecord> = Vec::new();
        let mut next_edge_based_id = 0u32;
        for edge in import_edges {
            if edge.source == edge.target {
                continue;
            }
            if edge.source >= node_count || edge.target >= node_count {
                return Err(PrepareError::InvalidImport(format!(
                    "edge {}→{} references a node beyond the node count",
                    edge.source, edge.target
                )));
            }
            let forward = edge.flags.contains(ImportFlag::Forward);
            let backward = edge.flags.contains(ImportFlag::Backward);
            if !forward && !backward {
                continue;
            }
            let weight = edge.weight.max(1);
            let data = NodeBasedEdgeData {
                weight,
                edge_based_node_id: 0,
                name_id: edge.name_id,
                class: edge.class,
                roundabout: edge.flags.contains(ImportFlag::Roundabout),
                ignore_in_grid: edge.flags.contains(ImportFlag::IgnoreInGrid),
            };

            // Canonical orientation: a backward-only edge is stored flipped.
            let (u, v) = if forward {
                (edge.source, edge.target)
            } else {
                (edge.target, edge.source)
            };
            let forward_node = next_edge_based_id;
            next_edge_based_id += 1;
            records.push(InputEdge {
                source: u,
                target: v,
                data: NodeBasedEdgeData {
                    edge_based_node_id: forward_node,
                    ..data.clone()
                },
            });
            let reverse_node = if forward && backward {
                let id = next_edge_based_id;
                next_edge_based_id += 1;
                records.push(InputEdge {
                    source: v,
                    target: u,
                    data: NodeBasedEdgeData {
                        edge_based_node_id: id,
                        ..data.clone()
                    },
                });
                id
            } else {
                INVALID_NODE
            };

            if !edge.flags.contains(ImportFlag::IgnoreInGrid) {
                segments.push(SegmentRecord {
                    u,
                    v,
                    u_coordinate: node_info[u as usize].coordinate,
                    v_coordinate: node_info[v as usize].coordinate,
                    forward_node,
                    reverse_node,
                    forward_weight: weight,
                    reverse_weight: weight,
                    name_id: edge.name_id,
                    tiny_component: false,
                });
            }
        }

        records.sort_by_key(|e| (e.source, e.target));
        let graph = DynamicGraph::from_sorted_edges(node_count, &records);
        let components = ComponentSizes::compute(&graph);
        for segment in &mut segments {
            segment.tiny_component =
                components.is_tiny(segment.u, config.tiny_component_max_size);
        }

        info!(
            "node-based graph: {} nodes, {} directed records, {} restrictions",
            node_count,
            graph.num_edges(),
            restrictions.len()
        );

        Ok(Self {
            graph,
            node_info,
            restrictions,
            barrier_nodes,
            traffic_lights,
            components,
            segments,
            edge_based_node_count: next_edge_based_id,
            config,
        })
    }

    /// The number of edge-based nodes (directed segments) this graph has.
    pub fn num_edge_based_nodes(&self) -> u32 {
        self.edge_based_node_count
    }

    fn coordinate(&self, node: NodeId) -> FixedCoordinate {
        self.node_info[node as usize].coordinate
    }

    fn turn_is_restricted(&self, u: NodeId, v: NodeId, w: NodeId) -> bool {
        if !self.config.speed_profile.use_turn_restrictions {
            return false;
        }
        match self.restrictions.only_target(u, v) {
            Some(only) => w != only,
            None => self.restrictions.is_forbidden(u, v, w),
        }
    }

    fn analyze_turn(
        &self,
        u: NodeId,
        v: NodeId,
        w: NodeId,
        approach: &NodeBasedEdgeData,
        exit: &NodeBasedEdgeData,
    ) -> TurnInstruction {
        if u == w {
            return TurnInstruction::UTurn;
        }
        match (approach.roundabout, exit.roundabout) {
            (true, true) => return TurnInstruction::StayOnRoundabout,
            (false, true) => return TurnInstruction::EnterRoundabout,
            (true, false) => return TurnInstruction::LeaveRoundabout,
            (false, false) => {}
        }
        let angle = angle_between(self.coordinate(u), self.coordinate(v), self.coordinate(w));
        let direction = TurnInstruction::from_angle(angle);
        if direction == TurnInstruction::GoStraight
            && approach.name_id == exit.name_id
            && approach.class == exit.class
        {
            return TurnInstruction::NoTurn;
        }
        direction
    }

    /// Emits the edge-based nodes and enumerates every legal turn.
    ///
    /// A turn u→v→w is legal iff it is not a U-turn (unless `v` is a dead
    /// end), no restriction forbids it, any mandatory restriction at (u, v)
    /// points at `w`, and `v` is not a barrier. The turn edge's weight is
    /// the exit segment's weight plus penalties for traffic signals and
    /// U-turns.
    pub fn run(self) -> Result<EdgeBasedGraphOutput, PrepareError> {
        let mut nodes = Vec::with_capacity(self.edge_based_node_count as usize);
        for u in 0..self.graph.num_nodes() {
            for e in self.graph.edge_range(u) {
                let v = self.graph.target(e);
                let data = self.graph.data(e);
                let u_coordinate = self.coordinate(u);
                let v_coordinate = self.coordinate(v);
                debug_assert!(!u_coordinate.is_sentinel() && !v_coordinate.is_sentinel());
                nodes.push(EdgeBasedNode {
                    id: data.edge_based_node_id,
                    source_coordinate: u_coordinate,
                    target_coordinate: v_coordinate,
                    name_id: data.name_id,
                    weight: data.weight,
                    tiny_component: self
                        .components
                        .is_tiny(u, self.config.tiny_component_max_size),
                    ignore_in_grid: data.ignore_in_grid,
                });
            }
        }
        nodes.sort_by_key(|node| node.id);

        let mut edges = SegmentedVector::new();
        let mut original_edge_data = Vec::new();
        let mut skipped_turns = 0u64;
        for u in 0..self.graph.num_nodes() {
            for e1 in self.graph.edge_range(u) {
                let v = self.graph.target(e1);
                if self.barrier_nodes.contains(v as usize) {
                    skipped_turns += u64::from(self.graph.out_degree(v));
                    continue;
                }
                let approach = self.graph.data(e1);
                for e2 in self.graph.edge_range(v) {
                    let w = self.graph.target(e2);
                    if u == w && self.graph.out_degree(v) > 1 {
                        // U-turns are only allowed at dead ends.
                        skipped_turns += 1;
                        continue;
                    }
                    if self.turn_is_restricted(u, v, w) {
                        skipped_turns += 1;
                        continue;
                    }
                    let exit = self.graph.data(e2);
                    let instruction = self.analyze_turn(u, v, w, approach, exit);
                    let traffic_signal = self.traffic_lights.contains(v as usize);
                    let mut weight = exit.weight;
                    if traffic_signal {
                        weight += self.config.speed_profile.traffic_signal_penalty;
                    }
                    if instruction == TurnInstruction::UTurn {
                        weight += self.config.speed_profile.u_turn_penalty;
                    }
                    let edge_id = original_edge_data.len() as u32;
                    original_edge_data.push(OriginalEdgeData {
                        via_node: v,
                        name_id: exit.name_id,
                        turn_instruction: instruction,
                        traffic_signal,
                    });
                    edges.push(EdgeBasedEdge {
                        source: approach.edge_based_node_id,
                        target: exit.edge_based_node_id,
                        edge_id,
                        weight,
                        forward: true,
                        backward: false,
                    });
                }
            }
        }

        info!(
            "edge-based graph: {} nodes, {} turns ({} skipped)",
            nodes.len(),
            edges.len(),
            skipped_turns
        );
        debug_assert!(
            nodes.iter().map(|n| n.id).all_unique(),
            "edge-based node ids must be dense and unique"
        );

        Ok(EdgeBasedGraphOutput {
            nodes,
            edges,
            original_edge_data,
            segments: self.segments,
            restriction_count: self.restrictions.len(),
        })
    }
}
