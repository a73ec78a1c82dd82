//! File Header (inode)
//!
//! A header is a fixed 128-byte record, exactly one sector: two length
//! fields plus an array of sector pointers. What the pointers mean depends
//! on the header's level, the height of its index subtree:
//!
//! - Level 1: pointers are data sectors (files up to 3,840 bytes)
//! - Level 2: pointers are level-1 headers (up to 115,200 bytes)
//! - Level 3: pointers are level-2 headers (up to 3,456,000 bytes)
//! - Level 4: pointers are level-3 headers
//!
//! The on-disk record carries no level tag; the level is implied by the
//! byte count and rebuilt identically by every reader. In core the level
//! lives in the index variant, so translation and deallocation dispatch
//! on it instead of re-deriving it per call.

use std::sync::Arc;

use tracing::debug;

use crate::div_round_up;
use crate::error::{OsError, OsResult};
use crate::machine::SynchDisk;
use crate::SECTOR_SIZE;

use super::bitmap::Bitmap;

/// Sector pointers in one header: the sector minus the two length fields
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 8) / 4;

/// Largest file a level-1 header can index
pub const LEVEL1_CAP: u32 = (NUM_DIRECT * SECTOR_SIZE) as u32;

/// Largest file a level-2 header can index
pub const LEVEL2_CAP: u32 = NUM_DIRECT as u32 * LEVEL1_CAP;

/// Largest file a level-3 header can index
pub const LEVEL3_CAP: u32 = NUM_DIRECT as u32 * LEVEL2_CAP;

/// Pointer slot that was never allocated
const UNUSED: u32 = u32::MAX;

/// Level of the header indexing `bytes` bytes
fn level_for_size(bytes: u32) -> u8 {
    if bytes <= LEVEL1_CAP {
        1
    } else if bytes <= LEVEL2_CAP {
        2
    } else if bytes <= LEVEL3_CAP {
        3
    } else {
        4
    }
}

/// Bytes one child of a height-`height` header spans
fn child_stride(height: u8) -> u32 {
    match height {
        2 => LEVEL1_CAP,
        3 => LEVEL2_CAP,
        4 => LEVEL3_CAP,
        _ => unreachable!("no children below level 2"),
    }
}

/// The pointer array, tagged by what it points at
#[derive(Debug, Clone)]
pub enum HeaderIndex {
    /// Level 1: data sectors
    Direct([u32; NUM_DIRECT]),
    /// Levels 2..=4: child header sectors
    Indirect {
        /// Sectors holding the child headers
        children: [u32; NUM_DIRECT],
        /// This header's level
        height: u8,
    },
}

/// On-disk file header
#[derive(Debug, Clone)]
pub struct FileHeader {
    num_bytes: u32,
    num_sectors: u32,
    index: HeaderIndex,
}

impl FileHeader {
    /// Allocate data blocks for a fresh file of `size` bytes
    ///
    /// Child headers are written to disk as they are built; the caller
    /// persists this root. On failure the free map has uncommitted marks
    /// and must be discarded, not flushed.
    pub fn allocate(disk: &Arc<SynchDisk>, free_map: &mut Bitmap, size: u32) -> OsResult<Self> {
        let num_sectors = div_round_up(size, SECTOR_SIZE as u32);
        let free = free_map.num_clear() as u32;
        if free < num_sectors {
            return Err(OsError::DiskFull {
                needed: num_sectors,
                free,
            });
        }

        let level = level_for_size(size);
        let index = if level == 1 {
            let mut sectors = [UNUSED; NUM_DIRECT];
            for slot in sectors.iter_mut().take(num_sectors as usize) {
                *slot = free_map.grab()?;
            }
            HeaderIndex::Direct(sectors)
        } else {
            let stride = child_stride(level);
            let mut children = [UNUSED; NUM_DIRECT];
            let mut remaining = size;
            let mut slot = 0;
            while remaining > 0 && slot < NUM_DIRECT {
                let child_sector = free_map.grab()?;
                let child = FileHeader::allocate(disk, free_map, remaining.min(stride))?;
                child.write_back(disk, child_sector);
                children[slot] = child_sector;
                remaining = remaining.saturating_sub(stride);
                slot += 1;
            }
            HeaderIndex::Indirect {
                children,
                height: level,
            }
        };

        debug!(
            target: "nucleon::fs",
            "allocated level-{} header for {} bytes ({} data sectors)",
            level, size, num_sectors
        );

        Ok(Self {
            num_bytes: size,
            num_sectors,
            index,
        })
    }

    /// Release every sector this header's subtree owns
    ///
    /// Recurses through all allocated children down to level 1, freeing
    /// each child's data and then the child header's own sector. Every
    /// freed sector must be marked in the map.
    pub fn deallocate(&self, disk: &Arc<SynchDisk>, free_map: &mut Bitmap) {
        match &self.index {
            HeaderIndex::Direct(sectors) => {
                for &sector in sectors.iter().take(self.num_sectors as usize) {
                    free_map.clear(sector);
                }
            }
            HeaderIndex::Indirect { children, .. } => {
                for &sector in children.iter().take(self.child_count()) {
                    let child = FileHeader::fetch_from(disk, sector);
                    child.deallocate(disk, free_map);
                    free_map.clear(sector);
                }
            }
        }
    }

    /// Sector holding the byte at `offset`
    ///
    /// Walks the index tree: each level divides the offset by its child
    /// stride and recurses into the selected child with the remainder.
    pub fn byte_to_sector(&self, disk: &Arc<SynchDisk>, offset: u32) -> u32 {
        assert!(offset < self.num_bytes, "offset {} past end of file", offset);
        match &self.index {
            HeaderIndex::Direct(sectors) => sectors[(offset as usize) / SECTOR_SIZE],
            HeaderIndex::Indirect { children, height } => {
                let stride = child_stride(*height);
                let slot = offset / stride;
                let child = FileHeader::fetch_from(disk, children[slot as usize]);
                child.byte_to_sector(disk, offset - slot * stride)
            }
        }
    }

    /// Read a header back from its sector, rebuilding the level from the
    /// byte count
    pub fn fetch_from(disk: &Arc<SynchDisk>, sector: u32) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        Self::from_bytes(&buf)
    }

    /// Write the header to its sector
    pub fn write_back(&self, disk: &Arc<SynchDisk>, sector: u32) {
        disk.write_sector(sector, &self.to_bytes());
    }

    /// Decode the 128-byte record
    pub fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let num_bytes = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let num_sectors = u32::from_le_bytes(buf[4..8].try_into().unwrap());

        let mut entries = [UNUSED; NUM_DIRECT];
        for (i, slot) in entries.iter_mut().enumerate() {
            let at = 8 + i * 4;
            *slot = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        }

        let level = level_for_size(num_bytes);
        let index = if level == 1 {
            HeaderIndex::Direct(entries)
        } else {
            HeaderIndex::Indirect {
                children: entries,
                height: level,
            }
        };

        Self {
            num_bytes,
            num_sectors,
            index,
        }
    }

    /// Encode the 128-byte record
    pub fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_sectors.to_le_bytes());
        let entries = match &self.index {
            HeaderIndex::Direct(sectors) => sectors,
            HeaderIndex::Indirect { children, .. } => children,
        };
        for (i, &entry) in entries.iter().enumerate() {
            let at = 8 + i * 4;
            buf[at..at + 4].copy_from_slice(&entry.to_le_bytes());
        }
        buf
    }

    /// Logical file size in bytes
    pub fn file_length(&self) -> u32 {
        self.num_bytes
    }

    /// Data sectors the file spans
    pub fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    /// Height of this header's index subtree
    pub fn level(&self) -> u8 {
        match &self.index {
            HeaderIndex::Direct(_) => 1,
            HeaderIndex::Indirect { height, .. } => *height,
        }
    }

    /// Allocated children of an indirect header
    fn child_count(&self) -> usize {
        match &self.index {
            HeaderIndex::Direct(_) => self.num_sectors as usize,
            HeaderIndex::Indirect { height, .. } => {
                div_round_up(self.num_bytes, child_stride(*height)) as usize
            }
        }
    }

    /// Dump the header structure to stdout, for the inspection harness
    pub fn print(&self, disk: &Arc<SynchDisk>, indent: usize) {
        let pad = " ".repeat(indent);
        println!(
            "{}FileHeader: {} bytes, level {} structure",
            pad,
            self.num_bytes,
            self.level()
        );
        match &self.index {
            HeaderIndex::Direct(sectors) => {
                let used: Vec<String> = sectors
                    .iter()
                    .take(self.num_sectors as usize)
                    .map(|s| s.to_string())
                    .collect();
                println!("{}  data sectors: {}", pad, used.join(" "));
            }
            HeaderIndex::Indirect { children, .. } => {
                for &sector in children.iter().take(self.child_count()) {
                    println!("{}  child header at sector {}:", pad, sector);
                    FileHeader::fetch_from(disk, sector).print(disk, indent + 4);
                }
            }
        }
    }
}
