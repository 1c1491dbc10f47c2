//! # Hilbert-packed static R-tree
//!
//! Spatial index over road segments, bulk-loaded once during preprocessing.
//! Leaves are sorted along a Hilbert curve over their segment midpoints,
//! grouped into fixed-size pages that live on disk (`.fileIndex`, memory
//! mapped at query time with a small LRU page cache), while the internal
//! tree is packed bottom-up into the RAM-resident `.ramIndex` file.

use crate::coordinate::{COORDINATE_PRECISION, DistanceApproximator, FixedCoordinate};
use crate::edge::SegmentRecord;
use crate::{EdgeWeight, NodeId};
use lru::LruCache;
use memmap2::Mmap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use zerocopy::{FromBytes, I32, IntoBytes, LE, U32};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes, KnownLayout, Unaligned};

/// Leaf records per on-disk page.
pub const LEAF_PAGE_CAPACITY: usize = 128;
/// Children per internal node.
const BRANCHING_FACTOR: usize = 64;
/// On-disk page stride; a page's records plus header always fit.
const PAGE_BYTES: usize = 8192;
/// Hilbert curve order (bits per axis).
const HILBERT_ORDER: u32 = 16;
/// Below this zoom, segments in tiny components are not snapping candidates.
const TINY_COMPONENT_SUPPRESSION_ZOOM: u32 = 15;
/// Leaf pages held decoded in RAM.
const PAGE_CACHE_SIZE: usize = 128;

const LEAF_FLAG_TINY_COMPONENT: u32 = 1;

#[derive(Debug, Error)]
pub enum RTreeError {
    #[error("I/O error on the spatial index: {0}")]
    Io(#[from] std::io::Error),
    #[error("the ram index file is malformed")]
    MalformedRamIndex,
    #[error("leaf page {0} is out of bounds for the leaf file")]
    LeafPageOutOfBounds(u32),
}

/// On-disk leaf record: one road segment plus the edge-based nodes for its
/// two directions. This is everything phantom-node synthesis needs, so the
/// nearest-neighbor query never touches the facade.
#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub struct RTreeLeaf {
    pub forward_node: U32<LE>,
    pub reverse_node: U32<LE>,
    pub u: U32<LE>,
    pub v: U32<LE>,
    pub u_lat: I32<LE>,
    pub u_lon: I32<LE>,
    pub v_lat: I32<LE>,
    pub v_lon: I32<LE>,
    pub forward_weight: I32<LE>,
    pub reverse_weight: I32<LE>,
    pub name_id: U32<LE>,
    pub flags: U32<LE>,
}

impl RTreeLeaf {
    fn from_segment(segment: &SegmentRecord) -> Self {
        Self {
            forward_node: U32::new(segment.forward_node),
            reverse_node: U32::new(segment.reverse_node),
            u: U32::new(segment.u),
            v: U32::new(segment.v),
            u_lat: I32::new(segment.u_coordinate.lat),
            u_lon: I32::new(segment.u_coordinate.lon),
            v_lat: I32::new(segment.v_coordinate.lat),
            v_lon: I32::new(segment.v_coordinate.lon),
            forward_weight: I32::new(segment.forward_weight),
            reverse_weight: I32::new(segment.reverse_weight),
            name_id: U32::new(segment.name_id),
            flags: U32::new(u32::from(segment.tiny_component) * LEAF_FLAG_TINY_COMPONENT),
        }
    }

    pub fn u_coordinate(&self) -> FixedCoordinate {
        FixedCoordinate::new(self.u_lat.get(), self.u_lon.get())
    }

    pub fn v_coordinate(&self) -> FixedCoordinate {
        FixedCoordinate::new(self.v_lat.get(), self.v_lon.get())
    }

    pub fn is_tiny_component(&self) -> bool {
        self.flags.get() & LEAF_FLAG_TINY_COMPONENT != 0
    }

    fn mbr(&self) -> Rect {
        Rect::of_segment(self.u_coordinate(), self.v_coordinate())
    }
}

#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
struct LeafPageHeader {
    count: U32<LE>,
    _spare: U32<LE>,
}

/// Axis-aligned bounding rectangle in fixed-point coordinates.
#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub struct Rect {
    min_lat: I32<LE>,
    min_lon: I32<LE>,
    max_lat: I32<LE>,
    max_lon: I32<LE>,
}

impl Rect {
    fn empty() -> Self {
        Self {
            min_lat: I32::new(i32::MAX),
            min_lon: I32::new(i32::MAX),
            max_lat: I32::new(i32::MIN),
            max_lon: I32::new(i32::MIN),
        }
    }

    fn of_segment(a: FixedCoordinate, b: FixedCoordinate) -> Self {
        Self {
            min_lat: I32::new(a.lat.min(b.lat)),
            min_lon: I32::new(a.lon.min(b.lon)),
            max_lat: I32::new(a.lat.max(b.lat)),
            max_lon: I32::new(a.lon.max(b.lon)),
        }
    }

    fn extend(&mut self, other: &Rect) {
        self.min_lat = I32::new(self.min_lat.get().min(other.min_lat.get()));
        self.min_lon = I32::new(self.min_lon.get().min(other.min_lon.get()));
        self.max_lat = I32::new(self.max_lat.get().max(other.max_lat.get()));
        self.max_lon = I32::new(self.max_lon.get().max(other.max_lon.get()));
    }

    /// Squared distance in meters from `point` to the nearest rect edge
    /// (zero when inside), under the approximator's projection.
    fn min_distance_squared(&self, approximator: &DistanceApproximator, point: FixedCoordinate) -> f64 {
        let clamped = FixedCoordinate::new(
            point.lat.clamp(self.min_lat.get(), self.max_lat.get()),
            point.lon.clamp(self.min_lon.get(), self.max_lon.get()),
        );
        approximator.distance_squared(clamped)
    }
}

/// Internal tree node persisted in `.ramIndex`.
///
/// Nodes are packed level by level with the root last. A node either points
/// at a run of child nodes (interior levels) or at a run of leaf pages.
#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
struct TreeNode {
    mbr: Rect,
    first_child: U32<LE>,
    child_count: U32<LE>,
    /// 1 if children are leaf pages, 0 if children are tree nodes.
    leaf_parent: U32<LE>,
    _spare: U32<LE>,
}

/// Maps a coordinate to the Hilbert curve position of its cell.
///
/// Classic d-from-xy bit transform at `HILBERT_ORDER` bits per axis.
fn hilbert_value(c: FixedCoordinate) -> u64 {
    let side = 1u32 << HILBERT_ORDER;
    // Normalize into [0, 2^order).
    let scale = |value: i64, range: i64| -> u32 {
        let shifted = value + range / 2;
        let cell = (shifted * i64::from(side)) / range;
        cell.clamp(0, i64::from(side) - 1) as u32
    };
    let mut x = scale(i64::from(c.lon), 360 * i64::from(COORDINATE_PRECISION) + 1);
    let mut y = scale(i64::from(c.lat), 180 * i64::from(COORDINATE_PRECISION) + 1);

    let mut rx: u32;
    let mut ry: u32;
    let mut d: u64 = 0;
    let mut s = side / 2;
    while s > 0 {
        rx = u32::from((x & s) > 0);
        ry = u32::from((y & s) > 0);
        d += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);
        // Rotate the quadrant.
        if ry == 0 {
            if rx == 1 {
                x = s.wrapping_sub(1).wrapping_sub(x) & (side - 1);
                y = s.wrapping_sub(1).wrapping_sub(y) & (side - 1);
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

fn midpoint(a: FixedCoordinate, b: FixedCoordinate) -> FixedCoordinate {
    FixedCoordinate::new(
        ((i64::from(a.lat) + i64::from(b.lat)) / 2) as i32,
        ((i64::from(a.lon) + i64::from(b.lon)) / 2) as i32,
    )
}

/// Bulk-loads the index and persists both artifacts.
///
/// The same segment list always produces byte-identical files: the Hilbert
/// sort breaks ties by the forward edge-based node id.
pub fn build(
    segments: &[SegmentRecord],
    ram_index_path: &Path,
    file_index_path: &Path,
) -> Result<(), RTreeError> {
    let mut leaves: Vec<RTreeLeaf> = segments.iter().map(RTreeLeaf::from_segment).collect();
    leaves.sort_by_key(|leaf| {
        (
            hilbert_value(midpoint(leaf.u_coordinate(), leaf.v_coordinate())),
            leaf.forward_node.get(),
        )
    });

    // Write leaf pages at a fixed stride.
    let mut leaf_writer = BufWriter::new(File::create(file_index_path)?);
    let mut page_mbrs: Vec<Rect> = Vec::new();
    for page in leaves.chunks(LEAF_PAGE_CAPACITY) {
        let header = LeafPageHeader {
            count: U32::new(page.len() as u32),
            _spare: U32::new(0),
        };
        let mut written = 0usize;
        leaf_writer.write_all(header.as_bytes())?;
        written += size_of::<LeafPageHeader>();
        let mut mbr = Rect::empty();
        for leaf in page {
            leaf_writer.write_all(leaf.as_bytes())?;
            written += size_of::<RTreeLeaf>();
            mbr.extend(&leaf.mbr());
        }
        leaf_writer.write_all(&vec![0u8; PAGE_BYTES - written])?;
        page_mbrs.push(mbr);
    }
    leaf_writer.flush()?;

    // Pack the internal tree bottom-up: one node per leaf page, then group
    // by the branching factor until a single root remains.
    let mut nodes: Vec<TreeNode> = page_mbrs
        .iter()
        .enumerate()
        .map(|(i, mbr)| TreeNode {
            mbr: *mbr,
            first_child: U32::new(i as u32),
            child_count: U32::new(1),
            leaf_parent: U32::new(1),
            _spare: U32::new(0),
        })
        .collect();

    let mut level_start = 0usize;
    let mut level_len = nodes.len();
    while level_len > 1 {
        let mut next_level = Vec::new();
        for chunk_start in (0..level_len).step_by(BRANCHING_FACTOR) {
            let chunk_len = BRANCHING_FACTOR.min(level_len - chunk_start);
            let mut mbr = Rect::empty();
            for i in 0..chunk_len {
                mbr.extend(&nodes[level_start + chunk_start + i].mbr);
            }
            next_level.push(TreeNode {
                mbr,
                first_child: U32::new((level_start + chunk_start) as u32),
                child_count: U32::new(chunk_len as u32),
                leaf_parent: U32::new(0),
                _spare: U32::new(0),
            });
        }
        level_start = nodes.len();
        level_len = next_level.len();
        nodes.extend(next_level);
    }

    let mut ram_writer = BufWriter::new(File::create(ram_index_path)?);
    ram_writer.write_all(U32::<LE>::new(nodes.len() as u32).as_bytes())?;
    ram_writer.write_all(U32::<LE>::new(page_mbrs.len() as u32).as_bytes())?;
    for node in &nodes {
        ram_writer.write_all(node.as_bytes())?;
    }
    ram_writer.flush()?;
    Ok(())
}

/// A snapped candidate segment, as returned by the nearest query.
#[derive(Clone, Copy, Debug)]
pub struct NearestSegment {
    pub forward_node: NodeId,
    pub reverse_node: NodeId,
    pub name_id: u32,
    pub forward_weight: EdgeWeight,
    pub reverse_weight: EdgeWeight,
    pub u_coordinate: FixedCoordinate,
    pub v_coordinate: FixedCoordinate,
    /// Foot of the perpendicular, clamped onto the segment.
    pub foot: FixedCoordinate,
    /// Position of the foot along u→v, in `[0, 1]`.
    pub ratio: f64,
    pub distance_meters: f64,
}

/// Backing storage for the leaf pages: a mapped file when loading from
/// disk, an owned copy when loading from a shared-memory section.
enum LeafStorage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl LeafStorage {
    fn bytes(&self) -> &[u8] {
        match self {
            LeafStorage::Mapped(map) => map,
            LeafStorage::Owned(vec) => vec,
        }
    }
}

/// Read side of the index: internal nodes in RAM, leaves memory mapped.
pub struct StaticRTree {
    nodes: Vec<TreeNode>,
    page_count: u32,
    leaf_file: LeafStorage,
    page_cache: Mutex<LruCache<u32, Arc<Vec<RTreeLeaf>>>>,
}

#[derive(Clone, Copy, PartialEq)]
struct QueueEntry {
    distance_squared: f64,
    node: u32,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we need the nearest first.
        other
            .distance_squared
            .total_cmp(&self.distance_squared)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl StaticRTree {
    pub fn open(ram_index_path: &Path, file_index_path: &Path) -> Result<Self, RTreeError> {
        let ram = std::fs::read(ram_index_path)?;
        let file = File::open(file_index_path)?;
        // SAFETY: the leaf file is written once during preprocessing and
        // never modified while mapped.
        let leaf_file = unsafe { Mmap::map(&file)? };
        Self::from_parts(&ram, LeafStorage::Mapped(leaf_file))
    }

    /// Opens from in-memory images of the two artifacts (shared-memory
    /// sections). The leaf bytes are owned by the returned tree.
    pub fn from_bytes(ram_index: &[u8], leaf_bytes: Vec<u8>) -> Result<Self, RTreeError> {
        Self::from_parts(ram_index, LeafStorage::Owned(leaf_bytes))
    }

    fn from_parts(ram: &[u8], leaf_file: LeafStorage) -> Result<Self, RTreeError> {
        if ram.len() < 8 {
            return Err(RTreeError::MalformedRamIndex);
        }
        let node_count =
            U32::<LE>::read_from_bytes(&ram[0..4]).map_err(|_| RTreeError::MalformedRamIndex)?;
        let page_count =
            U32::<LE>::read_from_bytes(&ram[4..8]).map_err(|_| RTreeError::MalformedRamIndex)?;
        let body = &ram[8..];
        let expected = node_count.get() as usize * size_of::<TreeNode>();
        if body.len() != expected {
            return Err(RTreeError::MalformedRamIndex);
        }
        let nodes = body
            .chunks_exact(size_of::<TreeNode>())
            .map(|chunk| TreeNode::read_from_bytes(chunk).map_err(|_| RTreeError::MalformedRamIndex))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            nodes,
            page_count: page_count.get(),
            leaf_file,
            page_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PAGE_CACHE_SIZE).unwrap(),
            )),
        })
    }

    fn load_page(&self, page: u32) -> Result<Arc<Vec<RTreeLeaf>>, RTreeError> {
        let mut cache = self.page_cache.lock().expect("poisoned page cache lock");
        if let Some(hit) = cache.get(&page) {
            return Ok(Arc::clone(hit));
        }
        let bytes = self.leaf_file.bytes();
        let offset = page as usize * PAGE_BYTES;
        if offset + PAGE_BYTES > bytes.len() {
            return Err(RTreeError::LeafPageOutOfBounds(page));
        }
        let header =
            LeafPageHeader::read_from_bytes(&bytes[offset..offset + size_of::<LeafPageHeader>()])
                .map_err(|_| RTreeError::LeafPageOutOfBounds(page))?;
        let mut leaves = Vec::with_capacity(header.count.get() as usize);
        let mut cursor = offset + size_of::<LeafPageHeader>();
        for _ in 0..header.count.get() {
            let leaf = RTreeLeaf::read_from_bytes(&bytes[cursor..cursor + size_of::<RTreeLeaf>()])
                .map_err(|_| RTreeError::LeafPageOutOfBounds(page))?;
            leaves.push(leaf);
            cursor += size_of::<RTreeLeaf>();
        }
        let leaves = Arc::new(leaves);
        cache.put(page, Arc::clone(&leaves));
        Ok(leaves)
    }

    /// Best-first nearest-segment search.
    ///
    /// Expands tree nodes in order of rectangle distance and stops as soon
    /// as the nearest unexpanded rectangle cannot beat the best segment
    /// found. At zoom levels below the suppression threshold, segments in
    /// tiny components are skipped.
    pub fn nearest_segment(
        &self,
        query: FixedCoordinate,
        zoom: u32,
    ) -> Result<Option<NearestSegment>, RTreeError> {
        if self.nodes.is_empty() {
            return Ok(None);
        }
        let suppress_tiny = zoom < TINY_COMPONENT_SUPPRESSION_ZOOM;
        let approximator = DistanceApproximator::new(query);
        let mut best: Option<NearestSegment> = None;
        let mut best_distance_squared = f64::INFINITY;

        let root = (self.nodes.len() - 1) as u32;
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry {
            distance_squared: self.nodes[root as usize]
                .mbr
                .min_distance_squared(&approximator, query),
            node: root,
        });

        while let Some(entry) = heap.pop() {
            if entry.distance_squared >= best_distance_squared {
                break;
            }
            let node = &self.nodes[entry.node as usize];
            if node.leaf_parent.get() == 1 {
                let page = node.first_child.get();
                debug_assert!(page < self.page_count);
                for leaf in self.load_page(page)?.iter() {
                    if suppress_tiny && leaf.is_tiny_component() {
                        continue;
                    }
                    let (ratio, foot, distance_squared) =
                        approximator.project_onto_segment(leaf.u_coordinate(), leaf.v_coordinate());
                    if distance_squared < best_distance_squared {
                        best_distance_squared = distance_squared;
                        best = Some(NearestSegment {
                            forward_node: leaf.forward_node.get(),
                            reverse_node: leaf.reverse_node.get(),
                            name_id: leaf.name_id.get(),
                            forward_weight: leaf.forward_weight.get(),
                            reverse_weight: leaf.reverse_weight.get(),
                            u_coordinate: leaf.u_coordinate(),
                            v_coordinate: leaf.v_coordinate(),
                            foot,
                            ratio,
                            distance_meters: distance_squared.sqrt(),
                        });
                    }
                }
            } else {
                let first = node.first_child.get() as usize;
                for child in first..first + node.child_count.get() as usize {
                    let distance_squared = self.nodes[child]
                        .mbr
                        .min_distance_squared(&approximator, query);
                    if distance_squared < best_distance_squared {
                        heap.push(QueueEntry {
                            distance_squared,
                            node: child as u32,
                        });
                    }
                }
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INVALID_NODE;
    use tempfile::tempdir;

    fn segment(
        id: u32,
        u: (i32, i32),
        v: (i32, i32),
        weight: EdgeWeight,
        tiny: bool,
    ) -> SegmentRecord {
        SegmentRecord {
            u: id * 2,
            v: id * 2 + 1,
            u_coordinate: FixedCoordinate::new(u.0, u.1),
            v_coordinate: FixedCoordinate::new(v.0, v.1),
            forward_node: id,
            reverse_node: INVALID_NODE,
            forward_weight: weight,
            reverse_weight: weight,
            name_id: id,
            tiny_component: tiny,
        }
    }

    fn build_and_open(segments: &[SegmentRecord]) -> (tempfile::TempDir, StaticRTree) {
        let dir = tempdir().unwrap();
        let ram = dir.path().join("test.ramIndex");
        let file = dir.path().join("test.fileIndex");
        build(segments, &ram, &file).unwrap();
        let tree = StaticRTree::open(&ram, &file).unwrap();
        (dir, tree)
    }

    #[test]
    fn snaps_to_the_closest_segment() {
        let segments = vec![
            segment(0, (0, 0), (0, 1_000_000), 100, false),
            segment(1, (5_000_000, 0), (5_000_000, 1_000_000), 100, false),
        ];
        let (_dir, tree) = build_and_open(&segments);

        let hit = tree
            .nearest_segment(FixedCoordinate::new(0, 500_000), 18)
            .unwrap()
            .unwrap();
        assert_eq!(hit.forward_node, 0);
        assert_eq!(hit.foot, FixedCoordinate::new(0, 500_000));
        assert!((hit.ratio - 0.5).abs() < 1e-9);
        assert!(hit.distance_meters < 1e-6);

        let hit = tree
            .nearest_segment(FixedCoordinate::new(5_000_100, 500_000), 18)
            .unwrap()
            .unwrap();
        assert_eq!(hit.forward_node, 1);
        assert!(hit.distance_meters > 0.0);
    }

    #[test]
    fn tiny_components_suppressed_at_low_zoom() {
        let segments = vec![
            segment(0, (0, 0), (0, 1_000_000), 100, true),
            segment(1, (2_000_000, 0), (2_000_000, 1_000_000), 100, false),
        ];
        let (_dir, tree) = build_and_open(&segments);

        let near_tiny = FixedCoordinate::new(0, 500_000);
        let high_zoom = tree.nearest_segment(near_tiny, 18).unwrap().unwrap();
        assert_eq!(high_zoom.forward_node, 0);
        let low_zoom = tree.nearest_segment(near_tiny, 11).unwrap().unwrap();
        assert_eq!(low_zoom.forward_node, 1);
    }

    #[test]
    fn handles_more_than_one_page() {
        let mut segments = Vec::new();
        for i in 0..500u32 {
            let lat = (i as i32) * 10_000;
            segments.push(segment(i, (lat, 0), (lat, 10_000), 10, false));
        }
        let (_dir, tree) = build_and_open(&segments);
        for probe in [0u32, 123, 499] {
            let hit = tree
                .nearest_segment(FixedCoordinate::new(probe as i32 * 10_000, 5_000), 18)
                .unwrap()
                .unwrap();
            assert_eq!(hit.forward_node, probe, "probe {probe} snapped elsewhere");
        }
    }

    #[test]
    fn rebuild_is_byte_identical() {
        let segments: Vec<SegmentRecord> = (0..300u32)
            .map(|i| {
                let lat = ((i * 37) % 300) as i32 * 7_000;
                let lon = ((i * 61) % 300) as i32 * 5_000;
                segment(i, (lat, lon), (lat + 4_000, lon + 3_000), 10 + i as EdgeWeight, i % 7 == 0)
            })
            .collect();
        let dir = tempdir().unwrap();
        let paths = [
            (dir.path().join("a.ramIndex"), dir.path().join("a.fileIndex")),
            (dir.path().join("b.ramIndex"), dir.path().join("b.fileIndex")),
        ];
        for (ram, file) in &paths {
            build(&segments, ram, file).unwrap();
        }
        assert_eq!(
            std::fs::read(&paths[0].0).unwrap(),
            std::fs::read(&paths[1].0).unwrap()
        );
        assert_eq!(
            std::fs::read(&paths[0].1).unwrap(),
            std::fs::read(&paths[1].1).unwrap()
        );
    }

    #[test]
    fn empty_index_returns_none() {
        let (_dir, tree) = build_and_open(&[]);
        assert!(
            tree.nearest_segment(FixedCoordinate::new(0, 0), 18)
                .unwrap()
                .is_none()
        );
    }
}
