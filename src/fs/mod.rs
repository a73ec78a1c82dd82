//! File System
//!
//! Maps textual paths to files. Every file is a header in one sector plus
//! data blocks; the free-space bitmap and the root directory are regular
//! files themselves, with headers in well-known sectors so they can be
//! found at boot. Both stay open for the kernel's lifetime.
//!
//! Operations that mutate the directory or the bitmap write the changes
//! back only on full success; on failure the modified in-core copies are
//! discarded. There is no journal: a crash between sector writes can
//! corrupt the disk, and no recovery is attempted.
//!
//! Operations are serialized; open files live in a table keyed by an
//! integer id handed back to the caller.

pub mod bitmap;
pub mod directory;
pub mod header;
pub mod openfile;
mod path;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{OsError, OsResult};
use crate::machine::SynchDisk;
use crate::{BITS_IN_BYTE, FREE_MAP_SECTOR, ROOT_DIRECTORY_SECTOR};

use bitmap::{Bitmap, PersistentBitmap};
use directory::{Directory, DIRECTORY_FILE_SIZE};
use header::FileHeader;
use openfile::OpenFile;
use path::{resolve_directory, resolve_parent, ResolveMode};

/// The file system
pub struct FileSystem {
    disk: Arc<SynchDisk>,
    free_map_file: OpenFile,
    root_dir_file: OpenFile,
    open_files: HashMap<i32, OpenFile>,
    next_fid: i32,
}

impl FileSystem {
    /// Mount the file system, formatting the disk first when asked
    ///
    /// Formatting lays down the free-map file and an empty root
    /// directory; without it, the two well-known headers are simply
    /// reopened.
    pub fn new(disk: Arc<SynchDisk>, format: bool) -> OsResult<Self> {
        let num_sectors = disk.num_sectors();

        if format {
            debug!(target: "nucleon::fs", "formatting {} sectors", num_sectors);

            let mut free_map = Bitmap::new(num_sectors);
            let directory = Directory::new();

            // The two well-known header sectors go first so nothing else
            // can claim them.
            free_map.mark(FREE_MAP_SECTOR);
            free_map.mark(ROOT_DIRECTORY_SECTOR);

            let free_map_size = (num_sectors / BITS_IN_BYTE) as u32;
            let map_hdr = FileHeader::allocate(&disk, &mut free_map, free_map_size)?;
            let dir_hdr = FileHeader::allocate(&disk, &mut free_map, DIRECTORY_FILE_SIZE)?;

            // Headers must hit the disk before the files are opened:
            // open reads the header back from its sector.
            map_hdr.write_back(&disk, FREE_MAP_SECTOR);
            dir_hdr.write_back(&disk, ROOT_DIRECTORY_SECTOR);

            let free_map_file = OpenFile::open(disk.clone(), FREE_MAP_SECTOR);
            let root_dir_file = OpenFile::open(disk.clone(), ROOT_DIRECTORY_SECTOR);

            let written = free_map_file.write_at(free_map.as_bytes(), 0);
            assert_eq!(written, free_map.as_bytes().len(), "short free-map write");
            directory.write_back(&root_dir_file);

            Ok(Self {
                disk,
                free_map_file,
                root_dir_file,
                open_files: HashMap::new(),
                next_fid: 0,
            })
        } else {
            Ok(Self {
                free_map_file: OpenFile::open(disk.clone(), FREE_MAP_SECTOR),
                root_dir_file: OpenFile::open(disk.clone(), ROOT_DIRECTORY_SECTOR),
                disk,
                open_files: HashMap::new(),
                next_fid: 0,
            })
        }
    }

    /// The shared disk handle
    pub fn disk(&self) -> &Arc<SynchDisk> {
        &self.disk
    }

    /// Free sectors remaining on the disk
    pub fn free_sectors(&self) -> usize {
        self.fetch_free_map().num_clear()
    }

    fn fetch_free_map(&self) -> PersistentBitmap {
        PersistentBitmap::fetch_from(&self.free_map_file, self.disk.num_sectors())
    }

    /// Create a file of `size` bytes
    ///
    /// Fails on a duplicate name, a full directory, or sector
    /// exhaustion; nothing is flushed to disk unless every step
    /// succeeded.
    pub fn create(&mut self, path: &str, size: u32) -> OsResult<()> {
        debug!(target: "nucleon::fs", "create {} size {}", path, size);

        let rp = resolve_parent(&self.disk, &self.root_dir_file, path, ResolveMode::Create)?;
        let mut dir = rp.dir;
        if dir.find(&rp.name).is_some() {
            return Err(OsError::AlreadyExists(rp.name));
        }

        let mut free_map = self.fetch_free_map();
        let header_sector = free_map.bitmap_mut().grab()?;
        dir.add(&rp.name, header_sector, true)?;
        let hdr = FileHeader::allocate(&self.disk, free_map.bitmap_mut(), size)?;

        hdr.write_back(&self.disk, header_sector);
        dir.write_back(&rp.dir_file);
        free_map.write_back(&self.free_map_file);
        Ok(())
    }

    /// Create an empty sub-directory
    pub fn create_directory(&mut self, path: &str) -> OsResult<()> {
        debug!(target: "nucleon::fs", "create directory {}", path);

        let rp = resolve_parent(&self.disk, &self.root_dir_file, path, ResolveMode::Create)?;
        let mut dir = rp.dir;
        if dir.find(&rp.name).is_some() {
            return Err(OsError::AlreadyExists(rp.name));
        }

        let mut free_map = self.fetch_free_map();
        let header_sector = free_map.bitmap_mut().grab()?;
        dir.add(&rp.name, header_sector, false)?;
        let hdr = FileHeader::allocate(&self.disk, free_map.bitmap_mut(), DIRECTORY_FILE_SIZE)?;

        // Only after allocation succeeded does the child file exist to
        // be opened and seeded with an empty table.
        hdr.write_back(&self.disk, header_sector);
        let sub_file = OpenFile::open(self.disk.clone(), header_sector);
        Directory::new().write_back(&sub_file);

        dir.write_back(&rp.dir_file);
        free_map.write_back(&self.free_map_file);
        Ok(())
    }

    /// Open a file and return its handle id
    pub fn open(&mut self, path: &str) -> OsResult<i32> {
        debug!(target: "nucleon::fs", "open {}", path);

        let rp = resolve_parent(&self.disk, &self.root_dir_file, path, ResolveMode::Strict)?;
        match rp.dir.lookup(&rp.name) {
            None => Err(OsError::NotFound(path.to_string())),
            Some((_, false)) => Err(OsError::IsADirectory(rp.name)),
            Some((sector, true)) => {
                let file = OpenFile::open(self.disk.clone(), sector);
                let fid = self.next_fid;
                self.next_fid += 1;
                self.open_files.insert(fid, file);
                Ok(fid)
            }
        }
    }

    /// Read from an open file at its seek position
    pub fn read(&mut self, buf: &mut [u8], id: i32) -> OsResult<usize> {
        let file = self.open_files.get_mut(&id).ok_or(OsError::BadFileId(id))?;
        Ok(file.read(buf))
    }

    /// Write to an open file at its seek position
    pub fn write(&mut self, buf: &[u8], id: i32) -> OsResult<usize> {
        let file = self.open_files.get_mut(&id).ok_or(OsError::BadFileId(id))?;
        Ok(file.write(buf))
    }

    /// Drop an open-file handle
    pub fn close(&mut self, id: i32) -> OsResult<()> {
        self.open_files
            .remove(&id)
            .map(|_| ())
            .ok_or(OsError::BadFileId(id))
    }

    /// Length of an open file
    pub fn file_length(&self, id: i32) -> OsResult<u32> {
        self.handle(id).map(OpenFile::length)
    }

    /// Borrow an open-file handle
    pub fn handle(&self, id: i32) -> OsResult<&OpenFile> {
        self.open_files.get(&id).ok_or(OsError::BadFileId(id))
    }

    /// Delete a file: free its data blocks and header sector, then drop
    /// its directory entry
    pub fn remove(&mut self, path: &str) -> OsResult<()> {
        debug!(target: "nucleon::fs", "remove {}", path);

        let rp = resolve_parent(&self.disk, &self.root_dir_file, path, ResolveMode::Strict)?;
        let mut dir = rp.dir;
        let (sector, _) = dir
            .lookup(&rp.name)
            .ok_or_else(|| OsError::NotFound(path.to_string()))?;

        let hdr = FileHeader::fetch_from(&self.disk, sector);
        let mut free_map = self.fetch_free_map();
        hdr.deallocate(&self.disk, free_map.bitmap_mut());
        free_map.clear(sector);
        dir.remove(&rp.name);

        free_map.write_back(&self.free_map_file);
        dir.write_back(&rp.dir_file);
        Ok(())
    }

    /// Print the names in the directory at `path`
    pub fn list(&self, path: &str) -> OsResult<()> {
        let (dir, _) = resolve_directory(&self.disk, &self.root_dir_file, path)?;
        dir.list();
        Ok(())
    }

    /// Print the tree under the directory at `path`
    pub fn recursive_list(&self, path: &str) -> OsResult<()> {
        let (dir, _) = resolve_directory(&self.disk, &self.root_dir_file, path)?;
        dir.recursive_list(&self.disk, 0);
        Ok(())
    }

    /// Names in the directory at `path`, for callers that need them
    /// rather than printed output
    pub fn read_directory(&self, path: &str) -> OsResult<Vec<String>> {
        let (dir, _) = resolve_directory(&self.disk, &self.root_dir_file, path)?;
        Ok(dir.names())
    }

    /// Dump everything: both well-known headers, the bitmap, and the
    /// root directory
    pub fn print(&self) {
        println!("Free-map file header:");
        FileHeader::fetch_from(&self.disk, FREE_MAP_SECTOR).print(&self.disk, 2);
        println!("Root directory file header:");
        FileHeader::fetch_from(&self.disk, ROOT_DIRECTORY_SECTOR).print(&self.disk, 2);

        let free_map = self.fetch_free_map();
        println!("Free sectors: {}", free_map.num_clear());

        let mut root = Directory::new();
        root.fetch_from(&self.root_dir_file);
        root.print();
    }

    /// Copy a host file onto the virtual disk at `dest`
    pub fn copy_from_host(&mut self, host: &Path, dest: &str) -> OsResult<()> {
        let data = std::fs::read(host).map_err(|e| OsError::Io(e.to_string()))?;

        self.create(dest, data.len() as u32)?;
        let fid = self.open(dest)?;
        let written = self.write(&data, fid)?;
        self.close(fid)?;

        debug!(
            target: "nucleon::fs",
            "copied {} bytes from {} to {}",
            written,
            host.display(),
            dest
        );
        Ok(())
    }
}
