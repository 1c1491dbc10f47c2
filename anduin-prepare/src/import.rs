//! Import-file parsing.
//!
//! The extractor (an external collaborator) hands preprocessing a JSON
//! document with nodes, edges, restrictions, and the barrier/traffic-light
//! node sets. This module maps it onto the in-memory import model.

use crate::PrepareError;
use anduin_graph::edge::RoadClass;
use anduin_graph::{
    EdgeWeight, FixedCoordinate, ImportEdge, ImportFlag, NodeEntry, NodeId, TurnRestriction,
};
use enumset::EnumSet;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Deserialize)]
struct RawNode {
    id: u32,
    lat: i32,
    lon: i32,
}

#[derive(Deserialize)]
struct RawEdge {
    source: NodeId,
    target: NodeId,
    weight: EdgeWeight,
    #[serde(default)]
    name_id: u32,
    #[serde(default)]
    oneway: bool,
    #[serde(default)]
    roundabout: bool,
    #[serde(default)]
    ignore_in_grid: bool,
    #[serde(default)]
    access_restricted: bool,
    #[serde(default)]
    contra_flow: bool,
}

#[derive(Deserialize)]
struct RawRestriction {
    from: NodeId,
    via: NodeId,
    to: NodeId,
    #[serde(default)]
    is_only: bool,
}

#[derive(Deserialize)]
struct RawImport {
    nodes: Vec<RawNode>,
    edges: Vec<RawEdge>,
    #[serde(default)]
    restrictions: Vec<RawRestriction>,
    #[serde(default)]
    barrier_nodes: Vec<NodeId>,
    #[serde(default)]
    traffic_lights: Vec<NodeId>,
    #[serde(default)]
    names: Vec<String>,
}

/// A parsed import dataset, ready for the edge-based graph factory.
pub struct ImportDataset {
    pub nodes: Vec<NodeEntry>,
    pub edges: Vec<ImportEdge>,
    pub restrictions: Vec<TurnRestriction>,
    pub barrier_nodes: Vec<NodeId>,
    pub traffic_lights: Vec<NodeId>,
    pub names: Vec<String>,
}

impl ImportDataset {
    pub fn read_from(path: &Path) -> Result<Self, PrepareError> {
        let raw: RawImport = serde_json::from_slice(&std::fs::read(path)?)?;

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        for node in &raw.nodes {
            let coordinate = FixedCoordinate::new(node.lat, node.lon);
            if !coordinate.is_valid() {
                return Err(PrepareError::InvalidImport(format!(
                    "node {} has an out-of-range coordinate",
                    node.id
                )));
            }
            nodes.push(NodeEntry {
                external_id: node.id,
                coordinate,
            });
        }

        let edges = raw
            .edges
            .into_iter()
            .map(|edge| {
                let mut flags = EnumSet::only(ImportFlag::Forward);
                if !edge.oneway {
                    flags |= ImportFlag::Backward;
                }
                if edge.roundabout {
                    flags |= ImportFlag::Roundabout;
                }
                if edge.ignore_in_grid {
                    flags |= ImportFlag::IgnoreInGrid;
                }
                if edge.access_restricted {
                    flags |= ImportFlag::AccessRestricted;
                }
                if edge.contra_flow {
                    flags |= ImportFlag::ContraFlow;
                }
                ImportEdge {
                    source: edge.source,
                    target: edge.target,
                    weight: edge.weight,
                    name_id: edge.name_id,
                    class: RoadClass::Minor,
                    flags,
                }
            })
            .collect();

        let restrictions: Vec<TurnRestriction> = raw
            .restrictions
            .into_iter()
            .map(|r| TurnRestriction {
                from: r.from,
                via: r.via,
                to: r.to,
                is_only: r.is_only,
            })
            .collect();

        info!(
            "import: {} nodes, {} restrictions from {}",
            nodes.len(),
            restrictions.len(),
            path.display()
        );
        Ok(Self {
            nodes,
            edges,
            restrictions,
            barrier_nodes: raw.barrier_nodes,
            traffic_lights: raw.traffic_lights,
            names: raw.names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "nodes": [
                    {"id": 100, "lat": 0, "lon": 0},
                    {"id": 101, "lat": 0, "lon": 1000}
                ],
                "edges": [
                    {"source": 0, "target": 1, "weight": 10, "oneway": true}
                ],
                "restrictions": [
                    {"from": 0, "via": 1, "to": 0, "is_only": false}
                ],
                "names": ["", "High Street"]
            })
            .to_string(),
        )
        .unwrap();
        let dataset = ImportDataset::read_from(&path).unwrap();
        assert_eq!(dataset.nodes.len(), 2);
        assert_eq!(dataset.edges.len(), 1);
        assert!(dataset.edges[0].flags.contains(ImportFlag::Forward));
        assert!(!dataset.edges[0].flags.contains(ImportFlag::Backward));
        assert_eq!(dataset.restrictions[0].via, 1);
        assert_eq!(dataset.names.len(), 2);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "nodes": [{"id": 0, "lat": 90_000_001, "lon": 0}],
                "edges": []
            })
            .to_string(),
        )
        .unwrap();
        assert!(matches!(
            ImportDataset::read_from(&path),
            Err(PrepareError::InvalidImport(_))
        ));
    }
}
