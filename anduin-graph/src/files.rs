//! # Persisted dataset formats
//!
//! One dataset is seven artifacts: `.hsgr` (contracted graph), `.nodes`
//! (coordinates), `.edges` (per-turn sidecar data), `.names` (string blob),
//! `.ramIndex`/`.fileIndex` (spatial index, see [`crate::rtree`]), and
//! `.timestamp`. All multi-byte integers are little-endian. Every parser
//! here works on plain byte slices so the same code reads files and
//! shared-memory sections.

use crate::edge::{OriginalEdgeData, QueryEdgeData};
use crate::static_graph::StaticGraph;
use crate::turn_instruction::TurnInstruction;
use crate::{EdgeWeight, NodeEntry, NodeId};
use crate::coordinate::FixedCoordinate;
use bitfield_struct::bitfield;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::warn;
use zerocopy::{FromBytes, I32, IntoBytes, LE, U32};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes, KnownLayout, Unaligned,
};

/// Compile-time dataset fingerprint. Prepended to `.hsgr`; a dataset built
/// by a different layout revision triggers a warning on load.
pub const DATASET_FINGERPRINT: [u8; 16] = *b"anduin-dataset-1";

/// Timestamps longer than this are truncated, matching the reply field.
const MAX_TIMESTAMP_LENGTH: usize = 25;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed {artifact} data: {reason}")]
    Malformed {
        artifact: &'static str,
        reason: &'static str,
    },
}

fn malformed(artifact: &'static str, reason: &'static str) -> FormatError {
    FormatError::Malformed { artifact, reason }
}

/// FNV-1a over the structural header fields; cheap tamper evidence, not
/// cryptography.
fn checksum_of(node_count: u32, edge_count: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in DATASET_FINGERPRINT
        .iter()
        .copied()
        .chain(node_count.to_le_bytes())
        .chain(edge_count.to_le_bytes())
    {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[bitfield(u32,
    repr = U32<LE>,
    from = crate::le_bits::conv_u32le::from_inner,
    into = crate::le_bits::conv_u32le::into_inner
)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned)]
struct PackedEdgeWord {
    #[bits(29)]
    weight: u32,
    #[bits(1)]
    shortcut: bool,
    #[bits(1)]
    forward: bool,
    #[bits(1)]
    backward: bool,
}

/// The packed 16-byte query edge as stored in `.hsgr`.
///
/// `id` is the middle node for shortcuts and the original-edge id otherwise.
#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
pub struct PackedQueryEdge {
    target: U32<LE>,
    word: PackedEdgeWord,
    id: U32<LE>,
    _spare: U32<LE>,
}

impl PackedQueryEdge {
    fn pack(target: NodeId, data: &QueryEdgeData) -> Self {
        debug_assert!(data.weight >= 0 && (data.weight as u32) < (1 << 29));
        Self {
            target: U32::new(target),
            word: PackedEdgeWord::new()
                .with_weight(data.weight as u32)
                .with_shortcut(data.shortcut)
                .with_forward(data.forward)
                .with_backward(data.backward),
            id: U32::new(data.id),
            _spare: U32::new(0),
        }
    }

    fn unpack(&self) -> (NodeId, QueryEdgeData) {
        (
            self.target.get(),
            QueryEdgeData {
                weight: self.word.weight() as EdgeWeight,
                id: self.id.get(),
                shortcut: self.word.shortcut(),
                forward: self.word.forward(),
                backward: self.word.backward(),
            },
        )
    }
}

/// Writes the contracted graph. The node array stores `node_count + 1`
/// offsets so the final edge run is closed without a special case.
pub fn write_hsgr(path: &Path, graph: &StaticGraph<QueryEdgeData>) -> Result<u32, FormatError> {
    let node_count = graph.num_nodes();
    let edge_count = graph.num_edges();
    let checksum = checksum_of(node_count, edge_count);

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&DATASET_FINGERPRINT)?;
    writer.write_all(U32::<LE>::new(checksum).as_bytes())?;
    writer.write_all(U32::<LE>::new(node_count).as_bytes())?;
    for n in 0..node_count {
        writer.write_all(U32::<LE>::new(graph.begin_edges(n)).as_bytes())?;
    }
    writer.write_all(U32::<LE>::new(edge_count).as_bytes())?;
    writer.write_all(U32::<LE>::new(edge_count).as_bytes())?;
    for e in 0..edge_count {
        let packed = PackedQueryEdge::pack(graph.target(e), graph.data(e));
        writer.write_all(packed.as_bytes())?;
    }
    writer.flush()?;
    Ok(checksum)
}

pub struct HsgrContents {
    pub checksum: u32,
    pub graph: StaticGraph<QueryEdgeData>,
}

fn read_u32(bytes: &[u8], cursor: &mut usize, artifact: &'static str) -> Result<u32, FormatError> {
    let end = cursor
        .checked_add(4)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| malformed(artifact, "truncated integer"))?;
    let value = U32::<LE>::read_from_bytes(&bytes[*cursor..end])
        .map_err(|_| malformed(artifact, "truncated integer"))?;
    *cursor = end;
    Ok(value.get())
}

/// Parses `.hsgr` bytes. A fingerprint mismatch is logged, not fatal; a
/// checksum mismatch is.
pub fn parse_hsgr(bytes: &[u8]) -> Result<HsgrContents, FormatError> {
    if bytes.len() < 16 {
        return Err(malformed(".hsgr", "shorter than the fingerprint"));
    }
    if bytes[..16] != DATASET_FINGERPRINT {
        warn!("dataset fingerprint mismatch; the file was built by a different revision");
    }
    let mut cursor = 16usize;
    let checksum = read_u32(bytes, &mut cursor, ".hsgr")?;
    let node_count = read_u32(bytes, &mut cursor, ".hsgr")?;

    let mut first_edges = Vec::with_capacity(node_count as usize + 1);
    for _ in 0..node_count {
        first_edges.push(read_u32(bytes, &mut cursor, ".hsgr")?);
    }
    first_edges.push(read_u32(bytes, &mut cursor, ".hsgr")?);
    let edge_count = read_u32(bytes, &mut cursor, ".hsgr")?;
    if *first_edges.last().unwrap() != edge_count {
        return Err(malformed(".hsgr", "offset array does not close over the edges"));
    }
    if first_edges.windows(2).any(|w| w[0] > w[1]) {
        return Err(malformed(".hsgr", "offset array is not monotone"));
    }
    if checksum != checksum_of(node_count, edge_count) {
        return Err(malformed(".hsgr", "checksum mismatch"));
    }

    let mut edges = Vec::with_capacity(edge_count as usize);
    for _ in 0..edge_count {
        let end = cursor + size_of::<PackedQueryEdge>();
        if end > bytes.len() {
            return Err(malformed(".hsgr", "truncated edge array"));
        }
        let packed = PackedQueryEdge::read_from_bytes(&bytes[cursor..end])
            .map_err(|_| malformed(".hsgr", "truncated edge array"))?;
        edges.push(packed.unpack());
        cursor = end;
    }
    Ok(HsgrContents {
        checksum,
        graph: StaticGraph::from_csr(first_edges, edges),
    })
}

#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
struct NodeRecord {
    lat: I32<LE>,
    lon: I32<LE>,
    external_id: U32<LE>,
}

pub fn write_nodes(path: &Path, nodes: &[NodeEntry]) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(U32::<LE>::new(nodes.len() as u32).as_bytes())?;
    for node in nodes {
        let record = NodeRecord {
            lat: I32::new(node.coordinate.lat),
            lon: I32::new(node.coordinate.lon),
            external_id: U32::new(node.external_id),
        };
        writer.write_all(record.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn parse_nodes(bytes: &[u8]) -> Result<Vec<NodeEntry>, FormatError> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor, ".nodes")?;
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let end = cursor + size_of::<NodeRecord>();
        if end > bytes.len() {
            return Err(malformed(".nodes", "truncated node array"));
        }
        let record = NodeRecord::read_from_bytes(&bytes[cursor..end])
            .map_err(|_| malformed(".nodes", "truncated node array"))?;
        nodes.push(NodeEntry {
            external_id: record.external_id.get(),
            coordinate: FixedCoordinate::new(record.lat.get(), record.lon.get()),
        });
        cursor = end;
    }
    Ok(nodes)
}

const EDGE_FLAG_TRAFFIC_SIGNAL: u8 = 1;

#[repr(C)]
#[derive(DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
struct OriginalEdgeRecord {
    via_node: U32<LE>,
    name_id: U32<LE>,
    turn_instruction: u8,
    flags: u8,
    _spare: [u8; 2],
}

pub fn write_edges(path: &Path, edges: &[OriginalEdgeData]) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(U32::<LE>::new(edges.len() as u32).as_bytes())?;
    for edge in edges {
        let record = OriginalEdgeRecord {
            via_node: U32::new(edge.via_node),
            name_id: U32::new(edge.name_id),
            turn_instruction: edge.turn_instruction.into(),
            flags: u8::from(edge.traffic_signal) * EDGE_FLAG_TRAFFIC_SIGNAL,
            _spare: [0; 2],
        };
        writer.write_all(record.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn parse_edges(bytes: &[u8]) -> Result<Vec<OriginalEdgeData>, FormatError> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor, ".edges")?;
    let mut edges = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let end = cursor + size_of::<OriginalEdgeRecord>();
        if end > bytes.len() {
            return Err(malformed(".edges", "truncated edge array"));
        }
        let record = OriginalEdgeRecord::read_from_bytes(&bytes[cursor..end])
            .map_err(|_| malformed(".edges", "truncated edge array"))?;
        edges.push(OriginalEdgeData {
            via_node: record.via_node.get(),
            name_id: record.name_id.get(),
            turn_instruction: TurnInstruction::try_from(record.turn_instruction)
                .map_err(|_| malformed(".edges", "unknown turn instruction code"))?,
            traffic_signal: record.flags & EDGE_FLAG_TRAFFIC_SIGNAL != 0,
        });
        cursor = end;
    }
    Ok(edges)
}

/// Street names as a prefix-sum indexed blob.
pub struct NameTable {
    offsets: Vec<u32>,
    characters: Vec<u8>,
}

impl NameTable {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Looks up a name. Out-of-range ids (including the `u32::MAX` "no
    /// name" sentinel) resolve to the empty string.
    pub fn get(&self, name_id: u32) -> &str {
        let Some(&begin) = self.offsets.get(name_id as usize) else {
            return "";
        };
        let end = self
            .offsets
            .get(name_id as usize + 1)
            .copied()
            .unwrap_or(self.characters.len() as u32);
        std::str::from_utf8(&self.characters[begin as usize..end as usize]).unwrap_or("")
    }
}

pub fn write_names(path: &Path, names: &[String]) -> Result<(), FormatError> {
    let char_count: usize = names.iter().map(String::len).sum();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(U32::<LE>::new(names.len() as u32).as_bytes())?;
    writer.write_all(U32::<LE>::new(char_count as u32).as_bytes())?;
    let mut offset = 0u32;
    for name in names {
        writer.write_all(U32::<LE>::new(offset).as_bytes())?;
        offset += name.len() as u32;
    }
    for name in names {
        writer.write_all(name.as_bytes())?;
    }
    // Sentinel byte so the blob is never empty and scans always terminate.
    writer.write_all(&[0u8])?;
    writer.flush()?;
    Ok(())
}

pub fn parse_names(bytes: &[u8]) -> Result<NameTable, FormatError> {
    let mut cursor = 0usize;
    let name_count = read_u32(bytes, &mut cursor, ".names")?;
    let char_count = read_u32(bytes, &mut cursor, ".names")?;
    let mut offsets = Vec::with_capacity(name_count as usize);
    for _ in 0..name_count {
        offsets.push(read_u32(bytes, &mut cursor, ".names")?);
    }
    let end = cursor + char_count as usize;
    if end > bytes.len() {
        return Err(malformed(".names", "truncated character blob"));
    }
    if offsets.windows(2).any(|w| w[0] > w[1])
        || offsets.last().is_some_and(|&last| last > char_count)
    {
        return Err(malformed(".names", "offsets are not a prefix sum"));
    }
    Ok(NameTable {
        offsets,
        characters: bytes[cursor..end].to_vec(),
    })
}

pub fn write_timestamp(path: &Path, timestamp: &str) -> Result<(), FormatError> {
    let mut line: String = timestamp.chars().take(MAX_TIMESTAMP_LENGTH).collect();
    line.push('\n');
    std::fs::write(path, line)?;
    Ok(())
}

pub fn parse_timestamp(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    let mut timestamp: String = line.lines().next().unwrap_or("").trim().to_string();
    if timestamp.is_empty() {
        timestamp = "n/a".to_string();
    }
    timestamp.truncate(MAX_TIMESTAMP_LENGTH);
    timestamp
}
