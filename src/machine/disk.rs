//! Raw Sector Device
//!
//! Fixed-size sector I/O behind one trait with:
//! - In-memory implementation for tests
//! - File-backed image for a persistent virtual disk
//! - A shared, serialized handle for the file system and its open files
//!
//! Per the simulator contract, sector reads and writes do not fail;
//! out-of-range sectors are precondition violations.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{OsError, OsResult};
use crate::SECTOR_SIZE;

/// Sector-granularity storage device
pub trait SectorDevice: Send {
    /// Number of sectors on the device
    fn num_sectors(&self) -> usize;

    /// Read one sector into `buf` (`buf.len() == SECTOR_SIZE`)
    fn read_sector(&mut self, sector: usize, buf: &mut [u8]);

    /// Write one sector from `buf` (`buf.len() == SECTOR_SIZE`)
    fn write_sector(&mut self, sector: usize, buf: &[u8]);
}

/// In-memory disk for tests and ephemeral runs
pub struct RamDisk {
    sectors: Vec<u8>,
    num_sectors: usize,
}

impl RamDisk {
    /// Create a zeroed disk of `num_sectors` sectors
    pub fn new(num_sectors: usize) -> Self {
        Self {
            sectors: vec![0; num_sectors * SECTOR_SIZE],
            num_sectors,
        }
    }
}

impl SectorDevice for RamDisk {
    fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    fn read_sector(&mut self, sector: usize, buf: &mut [u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&self.sectors[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&mut self, sector: usize, buf: &[u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        let start = sector * SECTOR_SIZE;
        self.sectors[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}

/// Disk backed by a host image file, persistent across runs
pub struct FileDisk {
    file: File,
    num_sectors: usize,
}

impl FileDisk {
    /// Open or create an image of `num_sectors` sectors at `path`
    pub fn open(path: &Path, num_sectors: usize) -> OsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| OsError::Io(e.to_string()))?;
        file.set_len((num_sectors * SECTOR_SIZE) as u64)
            .map_err(|e| OsError::Io(e.to_string()))?;
        Ok(Self { file, num_sectors })
    }
}

impl SectorDevice for FileDisk {
    fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    fn read_sector(&mut self, sector: usize, buf: &mut [u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        self.file
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .and_then(|_| self.file.read_exact(buf))
            .expect("disk image read failed");
    }

    fn write_sector(&mut self, sector: usize, buf: &[u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        self.file
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .and_then(|_| self.file.write_all(buf))
            .expect("disk image write failed");
    }
}

/// Traffic counters for the shared disk
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStats {
    /// Sectors read since boot
    pub reads: u64,
    /// Sectors written since boot
    pub writes: u64,
}

/// Shared disk handle that serializes sector requests
///
/// Open files clone an `Arc<SynchDisk>`; the mutex makes each sector
/// transfer atomic with respect to the others.
pub struct SynchDisk {
    dev: Mutex<Box<dyn SectorDevice>>,
    stats: Mutex<DiskStats>,
    num_sectors: usize,
}

impl SynchDisk {
    /// Wrap a device in a shared handle
    pub fn new(dev: Box<dyn SectorDevice>) -> Arc<Self> {
        let num_sectors = dev.num_sectors();
        Arc::new(Self {
            dev: Mutex::new(dev),
            stats: Mutex::new(DiskStats::default()),
            num_sectors,
        })
    }

    /// Number of sectors on the underlying device
    pub fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    /// Read one sector
    pub fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        trace!(target: "nucleon::disk", "read sector {}", sector);
        self.dev.lock().read_sector(sector as usize, buf);
        self.stats.lock().reads += 1;
    }

    /// Write one sector
    pub fn write_sector(&self, sector: u32, buf: &[u8]) {
        trace!(target: "nucleon::disk", "write sector {}", sector);
        self.dev.lock().write_sector(sector as usize, buf);
        self.stats.lock().writes += 1;
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> DiskStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ram_disk_round_trip() {
        let mut disk = RamDisk::new(16);
        let data = [0xabu8; SECTOR_SIZE];
        disk.write_sector(3, &data);

        let mut out = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut out);
        assert_eq!(out, data);

        // untouched sectors stay zero
        disk.read_sector(4, &mut out);
        assert_eq!(out, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_file_disk_persists() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("DISK");

        let data = [0x5au8; SECTOR_SIZE];
        {
            let mut disk = FileDisk::open(&path, 16).unwrap();
            disk.write_sector(7, &data);
        }

        let mut disk = FileDisk::open(&path, 16).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        disk.read_sector(7, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_synch_disk_counts_traffic() {
        let disk = SynchDisk::new(Box::new(RamDisk::new(8)));
        let mut buf = [0u8; SECTOR_SIZE];
        disk.write_sector(0, &buf);
        disk.read_sector(0, &mut buf);
        disk.read_sector(1, &mut buf);

        let stats = disk.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_sector_panics() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(4, &mut buf);
    }
}
