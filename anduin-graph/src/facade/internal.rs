//! File-backed facade, plus the in-RAM dataset representation shared with
//! the shared-memory facade.

use super::{
    CoordinateReader, DataFacade, DatasetPaths, FacadeError, GraphReader, NameReader, SpatialReader,
};
use crate::coordinate::FixedCoordinate;
use crate::edge::{OriginalEdgeData, QueryEdgeData};
use crate::files::{self, NameTable};
use crate::rtree::{NearestSegment, RTreeError, StaticRTree};
use crate::static_graph::StaticGraph;
use crate::{EdgeId, NodeId};
use tracing::info;

/// One fully parsed dataset generation.
pub(super) struct LoadedDataset {
    pub(super) graph: StaticGraph<QueryEdgeData>,
    pub(super) checksum: u32,
    pub(super) coordinates: Vec<FixedCoordinate>,
    pub(super) original_edges: Vec<OriginalEdgeData>,
    pub(super) names: NameTable,
    pub(super) rtree: StaticRTree,
    pub(super) timestamp: String,
}

impl LoadedDataset {
    pub(super) fn load_from_paths(paths: &DatasetPaths) -> Result<Self, FacadeError> {
        info!("loading graph from {}", paths.hsgr.display());
        let hsgr = files::parse_hsgr(&std::fs::read(&paths.hsgr)?)?;
        info!(
            "loaded {} nodes and {} edges, checksum {}",
            hsgr.graph.num_nodes(),
            hsgr.graph.num_edges(),
            hsgr.checksum
        );

        let nodes = files::parse_nodes(&std::fs::read(&paths.nodes)?)?;
        let original_edges = files::parse_edges(&std::fs::read(&paths.edges)?)?;
        let names = files::parse_names(&std::fs::read(&paths.names)?)?;

        info!("loading r-tree from {}", paths.ram_index.display());
        let rtree = StaticRTree::open(&paths.ram_index, &paths.file_index)?;

        let timestamp =
            files::parse_timestamp(&std::fs::read(&paths.timestamp).unwrap_or_default());

        Ok(Self {
            graph: hsgr.graph,
            checksum: hsgr.checksum,
            coordinates: nodes.iter().map(|n| n.coordinate).collect(),
            original_edges,
            names,
            rtree,
            timestamp,
        })
    }

    /// Parses a dataset from the seven in-memory sections of a shared
    /// region slot, in artifact order.
    pub(super) fn from_sections(sections: [&[u8]; 7]) -> Result<Self, FacadeError> {
        let [hsgr, nodes, edges, names, ram_index, file_index, timestamp] = sections;
        let hsgr = files::parse_hsgr(hsgr)?;
        let nodes = files::parse_nodes(nodes)?;
        let original_edges = files::parse_edges(edges)?;
        let names = files::parse_names(names)?;
        let rtree = StaticRTree::from_bytes(ram_index, file_index.to_vec())?;
        Ok(Self {
            graph: hsgr.graph,
            checksum: hsgr.checksum,
            coordinates: nodes.iter().map(|n| n.coordinate).collect(),
            original_edges,
            names,
            rtree,
            timestamp: files::parse_timestamp(timestamp),
        })
    }
}

/// Implements the capability reader traits by delegating to a
/// [`LoadedDataset`] field. Both facades read identically once a
/// generation is in RAM; only acquisition and staleness handling differ,
/// so each writes its own [`DataFacade`] impl.
macro_rules! delegate_data_readers {
    ($type:ty, $field:ident) => {
        impl GraphReader for $type {
            #[inline]
            fn num_nodes(&self) -> u32 {
                self.$field.graph.num_nodes()
            }

            #[inline]
            fn num_edges(&self) -> u32 {
                self.$field.graph.num_edges()
            }

            #[inline]
            fn edge_range(&self, n: NodeId) -> std::ops::Range<EdgeId> {
                self.$field.graph.edge_range(n)
            }

            #[inline]
            fn target(&self, e: EdgeId) -> NodeId {
                self.$field.graph.target(e)
            }

            #[inline]
            fn edge_data(&self, e: EdgeId) -> QueryEdgeData {
                *self.$field.graph.data(e)
            }

            #[inline]
            fn find_edge(&self, u: NodeId, v: NodeId) -> Option<EdgeId> {
                self.$field.graph.find_edge(u, v)
            }

            #[inline]
            fn find_edge_in_either_direction(&self, u: NodeId, v: NodeId) -> Option<(EdgeId, bool)> {
                self.$field.graph.find_edge_in_either_direction(u, v)
            }
        }

        impl CoordinateReader for $type {
            #[inline]
            fn turn_data(&self, original_edge_id: u32) -> OriginalEdgeData {
                self.$field.original_edges[original_edge_id as usize]
            }

            #[inline]
            fn via_coordinate(&self, original_edge_id: u32) -> FixedCoordinate {
                let via = self.$field.original_edges[original_edge_id as usize].via_node;
                self.$field.coordinates[via as usize]
            }
        }

        impl NameReader for $type {
            #[inline]
            fn name(&self, name_id: u32) -> &str {
                self.$field.names.get(name_id)
            }
        }

        impl SpatialReader for $type {
            #[inline]
            fn nearest_segment(
                &self,
                coordinate: FixedCoordinate,
                zoom: u32,
            ) -> Result<Option<NearestSegment>, RTreeError> {
                self.$field.rtree.nearest_segment(coordinate, zoom)
            }
        }
    };
}

pub(super) use delegate_data_readers;

/// Facade over a dataset loaded directly from files.
pub struct InternalDataFacade {
    data: LoadedDataset,
}

impl InternalDataFacade {
    pub fn load(paths: &DatasetPaths) -> Result<Self, FacadeError> {
        Ok(Self {
            data: LoadedDataset::load_from_paths(paths)?,
        })
    }
}

delegate_data_readers!(InternalDataFacade, data);

impl DataFacade for InternalDataFacade {
    #[inline]
    fn timestamp(&self) -> &str {
        &self.data.timestamp
    }

    #[inline]
    fn checksum(&self) -> u32 {
        self.data.checksum
    }
}
