//! Open File
//!
//! A handle on one file: the fetched header plus a seek position. Byte
//! offsets translate to sectors through the header's index tree; partial
//! first and last sectors go through a read-modify-write of the whole
//! enclosing sector.
//!
//! Files are fixed-size: reads and writes clamp at the length set when
//! the file was created.

use std::sync::Arc;

use crate::machine::SynchDisk;
use crate::SECTOR_SIZE;

use super::header::FileHeader;

/// A handle on one on-disk file
#[derive(Clone)]
pub struct OpenFile {
    disk: Arc<SynchDisk>,
    hdr: FileHeader,
    sector: u32,
    seek: u32,
}

impl OpenFile {
    /// Open the file whose header lives at `sector`
    pub fn open(disk: Arc<SynchDisk>, sector: u32) -> Self {
        let hdr = FileHeader::fetch_from(&disk, sector);
        Self {
            disk,
            hdr,
            sector,
            seek: 0,
        }
    }

    /// Logical file size in bytes
    pub fn length(&self) -> u32 {
        self.hdr.file_length()
    }

    /// The file's header
    pub fn header(&self) -> &FileHeader {
        &self.hdr
    }

    /// Sector holding the file's header
    pub fn header_sector(&self) -> u32 {
        self.sector
    }

    /// Move the seek position
    pub fn seek(&mut self, position: u32) {
        self.seek = position;
    }

    /// Read at the seek position, advancing it; returns bytes read
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_at(buf, self.seek);
        self.seek += n as u32;
        n
    }

    /// Write at the seek position, advancing it; returns bytes written
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(buf, self.seek);
        self.seek += n as u32;
        n
    }

    /// Read up to `buf.len()` bytes starting at `offset`
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        let len = self.length();
        if offset >= len {
            return 0;
        }
        let n = buf.len().min((len - offset) as usize);

        let mut done = 0;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        while done < n {
            let pos = offset + done as u32;
            let sector = self.hdr.byte_to_sector(&self.disk, pos);
            let in_sector = pos as usize % SECTOR_SIZE;
            let take = (SECTOR_SIZE - in_sector).min(n - done);

            self.disk.read_sector(sector, &mut sector_buf);
            buf[done..done + take].copy_from_slice(&sector_buf[in_sector..in_sector + take]);
            done += take;
        }
        n
    }

    /// Write up to `buf.len()` bytes starting at `offset`
    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        let len = self.length();
        if offset >= len {
            return 0;
        }
        let n = buf.len().min((len - offset) as usize);

        let mut done = 0;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        while done < n {
            let pos = offset + done as u32;
            let sector = self.hdr.byte_to_sector(&self.disk, pos);
            let in_sector = pos as usize % SECTOR_SIZE;
            let take = (SECTOR_SIZE - in_sector).min(n - done);

            if take == SECTOR_SIZE {
                sector_buf.copy_from_slice(&buf[done..done + take]);
            } else {
                // Partial sector: preserve the bytes around the write.
                self.disk.read_sector(sector, &mut sector_buf);
                sector_buf[in_sector..in_sector + take].copy_from_slice(&buf[done..done + take]);
            }
            self.disk.write_sector(sector, &sector_buf);
            done += take;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::bitmap::Bitmap;
    use crate::machine::RamDisk;

    fn file_of_size(size: u32, sectors: usize) -> OpenFile {
        let disk = SynchDisk::new(Box::new(RamDisk::new(sectors)));
        let mut map = Bitmap::new(sectors);
        map.mark(0); // header sector
        let hdr = FileHeader::allocate(&disk, &mut map, size).unwrap();
        hdr.write_back(&disk, 0);
        OpenFile::open(disk, 0)
    }

    #[test]
    fn test_read_back_what_was_written() {
        let file = file_of_size(300, 16);
        let data: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        assert_eq!(file.write_at(&data, 0), 300);

        let mut out = vec![0u8; 300];
        assert_eq!(file.read_at(&mut out, 0), 300);
        assert_eq!(out, data);
    }

    #[test]
    fn test_unaligned_write_preserves_neighbors() {
        let file = file_of_size(256, 16);
        file.write_at(&[0x11; 256], 0);

        // Overwrite a span straddling the sector boundary.
        file.write_at(&[0x22; 10], 123);

        let mut out = vec![0u8; 256];
        file.read_at(&mut out, 0);
        assert_eq!(out[122], 0x11);
        assert_eq!(&out[123..133], &[0x22; 10]);
        assert_eq!(out[133], 0x11);
    }

    #[test]
    fn test_transfers_clamp_at_file_length() {
        let file = file_of_size(100, 16);
        assert_eq!(file.write_at(&[7u8; 200], 0), 100);
        assert_eq!(file.write_at(&[7u8; 10], 100), 0);

        let mut out = vec![0u8; 200];
        assert_eq!(file.read_at(&mut out, 0), 100);
        assert_eq!(file.read_at(&mut out, 100), 0);
        assert_eq!(file.read_at(&mut out, 95), 5);
    }

    #[test]
    fn test_sequential_read_advances_seek() {
        let mut file = file_of_size(64, 16);
        let data: Vec<u8> = (0..64).collect();
        file.write_at(&data, 0);

        let mut first = [0u8; 40];
        let mut rest = [0u8; 40];
        assert_eq!(file.read(&mut first), 40);
        assert_eq!(file.read(&mut rest), 24);
        assert_eq!(&first[..], &data[..40]);
        assert_eq!(&rest[..24], &data[40..]);
    }

    #[test]
    fn test_seek_repositions() {
        let mut file = file_of_size(64, 16);
        let data: Vec<u8> = (0..64).collect();
        file.write_at(&data, 0);

        file.seek(60);
        let mut out = [0u8; 8];
        assert_eq!(file.read(&mut out), 4);
        assert_eq!(&out[..4], &data[60..]);
    }
}
