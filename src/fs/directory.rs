//! Directory
//!
//! A fixed-capacity table mapping names to header sectors, itself stored
//! as a regular file. Entries serialize to 16 bytes: an in-use flag, a
//! fixed-width name, the header sector, and a file/directory marker.
//! Removal leaves a hole; the table is never compacted.

use std::sync::Arc;

use tracing::debug;

use crate::error::{OsError, OsResult};
use crate::machine::SynchDisk;

use super::openfile::OpenFile;

/// Entries per directory
pub const NUM_DIR_ENTRIES: usize = 64;

/// Longest file name component, in bytes
pub const FILE_NAME_MAX: usize = 9;

/// Name field width on disk: the name plus a terminating NUL
const NAME_BYTES: usize = FILE_NAME_MAX + 1;

/// Serialized entry width
pub const DIR_ENTRY_BYTES: usize = 1 + NAME_BYTES + 4 + 1;

/// Size of every directory's backing file
pub const DIRECTORY_FILE_SIZE: u32 = (DIR_ENTRY_BYTES * NUM_DIR_ENTRIES) as u32;

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    in_use: bool,
    name: [u8; NAME_BYTES],
    sector: u32,
    is_file: bool,
}

impl DirectoryEntry {
    fn empty() -> Self {
        Self {
            in_use: false,
            name: [0; NAME_BYTES],
            sector: 0,
            is_file: false,
        }
    }

    fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_BYTES);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    fn to_bytes(self) -> [u8; DIR_ENTRY_BYTES] {
        let mut buf = [0u8; DIR_ENTRY_BYTES];
        buf[0] = self.in_use as u8;
        buf[1..1 + NAME_BYTES].copy_from_slice(&self.name);
        buf[11..15].copy_from_slice(&self.sector.to_le_bytes());
        buf[15] = self.is_file as u8;
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_BYTES];
        name.copy_from_slice(&buf[1..1 + NAME_BYTES]);
        Self {
            in_use: buf[0] != 0,
            name,
            sector: u32::from_le_bytes(buf[11..15].try_into().unwrap()),
            is_file: buf[15] != 0,
        }
    }
}

/// In-core image of one directory file
#[derive(Debug, Clone)]
pub struct Directory {
    table: Vec<DirectoryEntry>,
}

impl Directory {
    /// Empty directory
    pub fn new() -> Self {
        Self {
            table: vec![DirectoryEntry::empty(); NUM_DIR_ENTRIES],
        }
    }

    /// Reload the table from its backing file
    pub fn fetch_from(&mut self, file: &OpenFile) {
        let mut buf = vec![0u8; DIRECTORY_FILE_SIZE as usize];
        let read = file.read_at(&mut buf, 0);
        assert_eq!(read, buf.len(), "short directory read");

        for (i, entry) in self.table.iter_mut().enumerate() {
            let at = i * DIR_ENTRY_BYTES;
            *entry = DirectoryEntry::from_bytes(&buf[at..at + DIR_ENTRY_BYTES]);
        }
    }

    /// Flush the table into its backing file
    pub fn write_back(&self, file: &OpenFile) {
        let mut buf = vec![0u8; DIRECTORY_FILE_SIZE as usize];
        for (i, entry) in self.table.iter().enumerate() {
            let at = i * DIR_ENTRY_BYTES;
            buf[at..at + DIR_ENTRY_BYTES].copy_from_slice(&entry.to_bytes());
        }
        let written = file.write_at(&buf, 0);
        assert_eq!(written, buf.len(), "short directory write");
    }

    /// Header sector and file marker for `name`, if present
    pub fn lookup(&self, name: &str) -> Option<(u32, bool)> {
        self.table
            .iter()
            .find(|e| e.in_use && e.name() == name)
            .map(|e| (e.sector, e.is_file))
    }

    /// Header sector for `name`, if present
    pub fn find(&self, name: &str) -> Option<u32> {
        self.lookup(name).map(|(sector, _)| sector)
    }

    /// True when `name` is present and marks a regular file
    pub fn is_file(&self, name: &str) -> bool {
        self.lookup(name).map(|(_, is_file)| is_file).unwrap_or(false)
    }

    /// Record `name` at `sector` in the first unused slot
    pub fn add(&mut self, name: &str, sector: u32, is_file: bool) -> OsResult<()> {
        if name.len() > FILE_NAME_MAX {
            return Err(OsError::NameTooLong(name.to_string()));
        }
        if self.lookup(name).is_some() {
            return Err(OsError::AlreadyExists(name.to_string()));
        }

        let slot = self
            .table
            .iter_mut()
            .find(|e| !e.in_use)
            .ok_or(OsError::DirectoryFull)?;

        slot.in_use = true;
        slot.name = [0; NAME_BYTES];
        slot.name[..name.len()].copy_from_slice(name.as_bytes());
        slot.sector = sector;
        slot.is_file = is_file;

        debug!(target: "nucleon::fs", "directory add {} -> sector {}", name, sector);
        Ok(())
    }

    /// Drop `name` from the table, leaving its slot unused
    pub fn remove(&mut self, name: &str) -> bool {
        match self
            .table
            .iter_mut()
            .find(|e| e.in_use && e.name() == name)
        {
            Some(entry) => {
                entry.in_use = false;
                true
            }
            None => false,
        }
    }

    /// Names currently in the table, in slot order
    pub fn names(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|e| e.in_use)
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Print the directory's names to stdout
    pub fn list(&self) {
        for entry in self.table.iter().filter(|e| e.in_use) {
            println!("{}", entry.name());
        }
    }

    /// Print the tree rooted here, sub-directories indented
    pub fn recursive_list(&self, disk: &Arc<SynchDisk>, depth: usize) {
        for entry in self.table.iter().filter(|e| e.in_use) {
            println!("{}{}", "    ".repeat(depth), entry.name());
            if !entry.is_file {
                let file = OpenFile::open(disk.clone(), entry.sector);
                let mut sub = Directory::new();
                sub.fetch_from(&file);
                sub.recursive_list(disk, depth + 1);
            }
        }
    }

    /// Dump the table with sectors and markers, for the inspection harness
    pub fn print(&self) {
        println!("Directory contents:");
        for entry in self.table.iter().filter(|e| e.in_use) {
            let kind = if entry.is_file { "file" } else { "dir" };
            println!("  {} ({}) at sector {}", entry.name(), kind, entry.sector);
        }
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
