//! # Shared-memory dataset region
//!
//! Two dataset generations coexist in one mapped region so a writer can
//! stage the next generation while queries run against the current one.
//! The header carries a generation counter and the active slot's section
//! table; flipping them is the only mutation readers can observe, and it
//! happens under the swap barrier with no queries in flight.
//!
//! Region layout (all integers little-endian):
//!
//! ```text
//! 0    magic
//! 4    layout version
//! 8    generation counter (atomic)
//! 12   active slot (0/1, u32::MAX before the first publish)
//! 16   slot 0 section table: 7 × (offset u64, length u64)
//! 128  slot 1 section table
//! 4096 slot data
//! ```

use super::barrier::SwapBarrier;
use super::internal::{LoadedDataset, delegate_data_readers};
use super::{
    CoordinateReader, DataFacade, DatasetPaths, FacadeError, GraphReader, NameReader, SpatialReader,
};
use crate::coordinate::FixedCoordinate;
use crate::edge::{OriginalEdgeData, QueryEdgeData};
use crate::rtree::{NearestSegment, RTreeError};
use crate::{EdgeId, NodeId};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

pub const REGION_MAGIC: u32 = 0x414e_4475; // "ANDu"
const LAYOUT_VERSION: u32 = 1;
const SECTION_COUNT: usize = 7;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const GENERATION_OFFSET: usize = 8;
const ACTIVE_SLOT_OFFSET: usize = 12;
const SLOT_TABLE_OFFSET: [usize; 2] = [16, 128];
const DATA_OFFSET: usize = 4096;

const NO_ACTIVE_SLOT: u32 = u32::MAX;

/// The seven artifact images of one dataset, in section-table order.
pub struct DatasetSections {
    pub sections: [Vec<u8>; SECTION_COUNT],
}

impl DatasetSections {
    /// Reads all artifacts of a prepared dataset from disk.
    pub fn read_from(paths: &DatasetPaths) -> Result<Self, FacadeError> {
        Ok(Self {
            sections: [
                std::fs::read(&paths.hsgr)?,
                std::fs::read(&paths.nodes)?,
                std::fs::read(&paths.edges)?,
                std::fs::read(&paths.names)?,
                std::fs::read(&paths.ram_index)?,
                std::fs::read(&paths.file_index)?,
                std::fs::read(&paths.timestamp).unwrap_or_default(),
            ],
        })
    }

    fn total_len(&self) -> usize {
        self.sections.iter().map(Vec::len).sum()
    }
}

/// A mapped dataset region, usable for both staging (writer) and reading.
pub struct SharedRegion {
    map: MmapMut,
    path: PathBuf,
}

impl SharedRegion {
    /// Creates (or truncates) a region file with room for two generations
    /// of up to `slot_capacity` bytes each.
    pub fn create(path: &Path, slot_capacity: usize) -> Result<Self, FacadeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((DATA_OFFSET + 2 * slot_capacity) as u64)?;
        // SAFETY: all maps of this file are MAP_SHARED within this process,
        // and mutations are serialized by the swap barrier.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mut region = Self {
            map,
            path: path.to_path_buf(),
        };
        region.write_u32(MAGIC_OFFSET, REGION_MAGIC);
        region.write_u32(VERSION_OFFSET, LAYOUT_VERSION);
        region.write_u32(GENERATION_OFFSET, 0);
        region.write_u32(ACTIVE_SLOT_OFFSET, NO_ACTIVE_SLOT);
        info!(
            "created shared region {} ({} bytes per slot)",
            path.display(),
            slot_capacity
        );
        Ok(region)
    }

    /// Opens an existing region.
    pub fn open(path: &Path) -> Result<Self, FacadeError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let region = Self {
            map,
            path: path.to_path_buf(),
        };
        if region.map.len() < DATA_OFFSET
            || region.read_u32(MAGIC_OFFSET) != REGION_MAGIC
            || region.read_u32(VERSION_OFFSET) != LAYOUT_VERSION
        {
            return Err(FacadeError::RegionMalformed);
        }
        Ok(region)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_capacity(&self) -> usize {
        (self.map.len() - DATA_OFFSET) / 2
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.map[offset..offset + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.map[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.map[offset..offset + 8].try_into().unwrap())
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.map[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn generation_cell(&self) -> &AtomicU32 {
        // SAFETY: the offset is 4-aligned within a page-aligned mapping and
        // the cell is only ever accessed atomically.
        unsafe { AtomicU32::from_ptr(self.map.as_ptr().add(GENERATION_OFFSET).cast_mut().cast()) }
    }

    /// Current generation counter (Acquire; pairs with [`Self::activate`]).
    pub fn generation(&self) -> u32 {
        self.generation_cell().load(Ordering::Acquire)
    }

    fn active_slot(&self) -> Option<u32> {
        match self.read_u32(ACTIVE_SLOT_OFFSET) {
            NO_ACTIVE_SLOT => None,
            slot => Some(slot),
        }
    }

    /// Writes a dataset into the inactive slot. Safe to call while queries
    /// read the active slot; nothing they can see changes.
    pub fn stage(&mut self, dataset: &DatasetSections) -> Result<(), FacadeError> {
        let needed = dataset.total_len();
        let capacity = self.slot_capacity();
        if needed > capacity {
            return Err(FacadeError::RegionTooSmall { needed, capacity });
        }
        let slot = match self.active_slot() {
            Some(active) => 1 - active,
            None => 0,
        };
        let slot_base = DATA_OFFSET + slot as usize * capacity;
        let mut cursor = slot_base;
        let table = SLOT_TABLE_OFFSET[slot as usize];
        for (i, section) in dataset.sections.iter().enumerate() {
            self.map[cursor..cursor + section.len()].copy_from_slice(section);
            self.write_u64(table + i * 16, cursor as u64);
            self.write_u64(table + i * 16 + 8, section.len() as u64);
            cursor += section.len();
        }
        debug!(
            "staged {} bytes into slot {} of {}",
            needed,
            slot,
            self.path.display()
        );
        Ok(())
    }

    /// Flips the staged slot live and bumps the generation counter.
    ///
    /// Must only be called while holding the region's swap barrier update
    /// guard; the Release store pairs with readers' Acquire loads.
    pub fn activate(&mut self) {
        let next = match self.active_slot() {
            Some(active) => 1 - active,
            None => 0,
        };
        self.write_u32(ACTIVE_SLOT_OFFSET, next);
        self.generation_cell().fetch_add(1, Ordering::Release);
        info!(
            "activated slot {} of {} (generation {})",
            next,
            self.path.display(),
            self.generation()
        );
    }

    fn section_bytes(&self, slot: u32, index: usize) -> Result<&[u8], FacadeError> {
        let table = SLOT_TABLE_OFFSET[slot as usize];
        let offset = self.read_u64(table + index * 16) as usize;
        let length = self.read_u64(table + index * 16 + 8) as usize;
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.map.len())
            .ok_or(FacadeError::RegionMalformed)?;
        Ok(&self.map[offset..end])
    }

    fn parse_active(&self) -> Result<(u32, LoadedDataset), FacadeError> {
        let generation = self.generation();
        let slot = self
            .active_slot()
            .ok_or_else(|| FacadeError::RegionUninitialized(self.path.clone()))?;
        let sections: [&[u8]; SECTION_COUNT] = [
            self.section_bytes(slot, 0)?,
            self.section_bytes(slot, 1)?,
            self.section_bytes(slot, 2)?,
            self.section_bytes(slot, 3)?,
            self.section_bytes(slot, 4)?,
            self.section_bytes(slot, 5)?,
            self.section_bytes(slot, 6)?,
        ];
        Ok((generation, LoadedDataset::from_sections(sections)?))
    }
}

/// Facade over the active generation of a shared region.
///
/// A query that observes a newer generation reloads the facade (under the
/// swap barrier's query ticket) before searching; the search engine drives
/// this through [`DataFacade::is_stale`] and [`DataFacade::reload`].
pub struct SharedDataFacade {
    region: SharedRegion,
    barrier: Arc<SwapBarrier>,
    generation: u32,
    data: LoadedDataset,
}

impl SharedDataFacade {
    pub fn attach(path: &Path) -> Result<Self, FacadeError> {
        let region = SharedRegion::open(path)?;
        let barrier = SwapBarrier::for_region(path);
        let (generation, data) = region.parse_active()?;
        Ok(Self {
            region,
            barrier,
            generation,
            data,
        })
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The process-wide swap barrier for this facade's region. Queries must
    /// run under a ticket from it.
    pub fn barrier(&self) -> Arc<SwapBarrier> {
        Arc::clone(&self.barrier)
    }

    /// Reparses the active slot if the region has advanced. Returns whether
    /// a reload happened.
    pub fn reload_if_stale(&mut self) -> Result<bool, FacadeError> {
        if self.region.generation() == self.generation {
            return Ok(false);
        }
        let (generation, data) = self.region.parse_active()?;
        self.generation = generation;
        self.data = data;
        debug!("facade reloaded at generation {generation}");
        Ok(true)
    }
}

delegate_data_readers!(SharedDataFacade, data);

impl DataFacade for SharedDataFacade {
    #[inline]
    fn timestamp(&self) -> &str {
        &self.data.timestamp
    }

    #[inline]
    fn checksum(&self) -> u32 {
        self.data.checksum
    }

    fn is_stale(&self) -> bool {
        self.region.generation() != self.generation
    }

    fn reload(&mut self) -> Result<bool, FacadeError> {
        self.reload_if_stale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_sections() -> DatasetSections {
        // Not a full dataset; just distinct recognizable section payloads.
        DatasetSections {
            sections: [
                b"hsgr".to_vec(),
                b"nodes".to_vec(),
                b"edges!".to_vec(),
                b"names".to_vec(),
                b"ram".to_vec(),
                b"file".to_vec(),
                b"2025".to_vec(),
            ],
        }
    }

    #[test]
    fn stage_and_activate_alternate_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut region = SharedRegion::create(&path, 4096).unwrap();
        assert_eq!(region.generation(), 0);
        assert!(region.active_slot().is_none());

        region.stage(&tiny_sections()).unwrap();
        region.activate();
        assert_eq!(region.generation(), 1);
        assert_eq!(region.active_slot(), Some(0));
        assert_eq!(region.section_bytes(0, 2).unwrap(), b"edges!");

        region.stage(&tiny_sections()).unwrap();
        region.activate();
        assert_eq!(region.generation(), 2);
        assert_eq!(region.active_slot(), Some(1));
    }

    #[test]
    fn oversized_dataset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut region = SharedRegion::create(&path, 8).unwrap();
        assert!(matches!(
            region.stage(&tiny_sections()),
            Err(FacadeError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn open_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        std::fs::write(&path, vec![0u8; 8192]).unwrap();
        assert!(matches!(
            SharedRegion::open(&path),
            Err(FacadeError::RegionMalformed)
        ));
    }

    #[test]
    fn generation_visible_across_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut writer = SharedRegion::create(&path, 4096).unwrap();
        let reader = SharedRegion::open(&path).unwrap();
        writer.stage(&tiny_sections()).unwrap();
        writer.activate();
        assert_eq!(reader.generation(), 1);
    }
}
