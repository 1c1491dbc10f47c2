//! # Dataset read facades
//!
//! The query side never touches files or shared memory directly; it reads
//! through capability traits so the same search code runs over a RAM-loaded
//! dataset and over a shared-memory region that can be hot-swapped under it.

mod barrier;
mod internal;
mod shared;

pub use barrier::{QueryGuard, SwapBarrier, UpdateGuard};
pub use internal::InternalDataFacade;
pub use shared::{DatasetSections, REGION_MAGIC, SharedDataFacade, SharedRegion};

use crate::coordinate::FixedCoordinate;
use crate::edge::{OriginalEdgeData, QueryEdgeData};
use crate::files::FormatError;
use crate::rtree::{NearestSegment, RTreeError};
use crate::{EdgeId, NodeId};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("configuration is missing the {0:?} path")]
    MissingPath(&'static str),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    RTree(#[from] RTreeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the shared region at {0} is not initialized")]
    RegionUninitialized(PathBuf),
    #[error("the shared region header is malformed")]
    RegionMalformed,
    #[error("the shared region is too small for the dataset ({needed} > {capacity} bytes)")]
    RegionTooSmall { needed: usize, capacity: usize },
}

/// The seven artifact paths of one dataset, keyed by logical name.
///
/// The core consumes exactly this map; it never reads the environment.
#[derive(Clone, Debug)]
pub struct DatasetPaths {
    pub hsgr: PathBuf,
    pub nodes: PathBuf,
    pub edges: PathBuf,
    pub names: PathBuf,
    pub ram_index: PathBuf,
    pub file_index: PathBuf,
    pub timestamp: PathBuf,
}

impl DatasetPaths {
    /// Derives the conventional seven paths from a dataset base path by
    /// appending the artifact extensions.
    pub fn from_base(base: &std::path::Path) -> Self {
        let with_extension = |extension: &str| {
            let mut os = base.as_os_str().to_owned();
            os.push(".");
            os.push(extension);
            PathBuf::from(os)
        };
        Self {
            hsgr: with_extension("hsgr"),
            nodes: with_extension("nodes"),
            edges: with_extension("edges"),
            names: with_extension("names"),
            ram_index: with_extension("ramIndex"),
            file_index: with_extension("fileIndex"),
            timestamp: with_extension("timestamp"),
        }
    }

    /// Builds from an explicit `key → path` map (the configuration surface).
    pub fn from_map(mut map: HashMap<String, PathBuf>) -> Result<Self, FacadeError> {
        let mut take = |key: &'static str| map.remove(key).ok_or(FacadeError::MissingPath(key));
        Ok(Self {
            hsgr: take("hsgrdata")?,
            nodes: take("nodesdata")?,
            edges: take("edgesdata")?,
            names: take("namesdata")?,
            ram_index: take("ramindex")?,
            file_index: take("fileindex")?,
            timestamp: take("timestamp")?,
        })
    }
}

/// Contracted-graph accessors.
pub trait GraphReader {
    fn num_nodes(&self) -> u32;
    fn num_edges(&self) -> u32;
    fn edge_range(&self, n: NodeId) -> std::ops::Range<EdgeId>;
    fn target(&self, e: EdgeId) -> NodeId;
    fn edge_data(&self, e: EdgeId) -> QueryEdgeData;
    fn find_edge(&self, u: NodeId, v: NodeId) -> Option<EdgeId>;
    fn find_edge_in_either_direction(&self, u: NodeId, v: NodeId) -> Option<(EdgeId, bool)>;
}

/// Per-turn sidecar lookups, keyed by original-edge id.
pub trait CoordinateReader {
    fn turn_data(&self, original_edge_id: u32) -> OriginalEdgeData;
    /// Coordinate of the via node the turn happens at.
    fn via_coordinate(&self, original_edge_id: u32) -> FixedCoordinate;
}

pub trait NameReader {
    /// Resolves a name id; unknown ids (including the `u32::MAX` sentinel)
    /// yield the empty string.
    fn name(&self, name_id: u32) -> &str;
}

/// Spatial index queries.
pub trait SpatialReader {
    fn nearest_segment(
        &self,
        coordinate: FixedCoordinate,
        zoom: u32,
    ) -> Result<Option<NearestSegment>, RTreeError>;
}

/// The full read surface consumed by the search engine and handlers.
pub trait DataFacade: GraphReader + CoordinateReader + NameReader + SpatialReader {
    fn timestamp(&self) -> &str;
    fn checksum(&self) -> u32;

    /// Whether a newer dataset generation has been published underneath
    /// this facade. File-backed facades never change.
    fn is_stale(&self) -> bool {
        false
    }

    /// Re-reads the active dataset generation, if there is anything to
    /// re-read. Callers must hold the region's swap-barrier query ticket
    /// and exclusive access to the facade while doing this.
    fn reload(&mut self) -> Result<bool, FacadeError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_from_map_require_every_artifact() {
        let mut map: HashMap<String, PathBuf> = [
            ("hsgrdata", "/data/x.hsgr"),
            ("nodesdata", "/data/x.nodes"),
            ("edgesdata", "/data/x.edges"),
            ("namesdata", "/data/x.names"),
            ("ramindex", "/data/x.ramIndex"),
            ("fileindex", "/data/x.fileIndex"),
            ("timestamp", "/data/x.timestamp"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
        .collect();

        let paths = DatasetPaths::from_map(map.clone()).unwrap();
        assert_eq!(paths.hsgr, PathBuf::from("/data/x.hsgr"));
        assert_eq!(paths.file_index, PathBuf::from("/data/x.fileIndex"));

        map.remove("ramindex");
        assert!(matches!(
            DatasetPaths::from_map(map),
            Err(FacadeError::MissingPath("ramindex"))
        ));
    }

    #[test]
    fn paths_from_base_append_extensions() {
        let paths = DatasetPaths::from_base(std::path::Path::new("/data/europe"));
        assert_eq!(paths.nodes, PathBuf::from("/data/europe.nodes"));
        assert_eq!(paths.ram_index, PathBuf::from("/data/europe.ramIndex"));
    }
}
