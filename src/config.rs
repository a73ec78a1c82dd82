//! Machine Configuration
//!
//! Disk geometry, timer parameters and debug switches for a simulated
//! machine instance.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{OsError, OsResult};
use crate::{BITS_IN_BYTE, SECTOR_SIZE};

/// Machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Number of sectors on the simulated disk
    pub num_sectors: usize,

    /// Backing image for the disk; `None` keeps the disk in memory
    pub disk_image: Option<PathBuf>,

    /// Ticks between timer interrupts (the aging hook)
    pub timer_interval: u64,

    /// Round-robin time quantum for the lowest scheduling band, in ticks
    pub time_quantum: u64,

    /// Logging level for the tracing subscriber
    pub log_level: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_sectors: 1024,
            disk_image: None,
            timer_interval: 100,
            time_quantum: 100,
            log_level: "info".into(),
        }
    }
}

impl MachineConfig {
    /// Configuration for unit tests: small in-memory disk
    pub fn test() -> Self {
        Self::default()
    }

    /// Configuration with enough sectors for files that cross the
    /// level-3 index boundary
    pub fn large() -> Self {
        Self {
            num_sectors: 32768,
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> OsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OsError::InvalidConfiguration(e.to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| OsError::InvalidConfiguration(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> OsResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| OsError::InvalidConfiguration(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| OsError::InvalidConfiguration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> OsResult<()> {
        if self.num_sectors % BITS_IN_BYTE != 0 {
            return Err(OsError::InvalidConfiguration(format!(
                "num_sectors must be a multiple of {}",
                BITS_IN_BYTE
            )));
        }

        // The free map and root directory need their headers plus data
        // blocks; anything under this cannot even format.
        let free_map_sectors = self.num_sectors / BITS_IN_BYTE / SECTOR_SIZE + 1;
        if self.num_sectors < free_map_sectors + 16 {
            return Err(OsError::InvalidConfiguration(format!(
                "num_sectors {} is too small to hold the file system metadata",
                self.num_sectors
            )));
        }

        if self.timer_interval == 0 || self.time_quantum == 0 {
            return Err(OsError::InvalidConfiguration(
                "timer_interval and time_quantum must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Bytes of the free-map file for this geometry
    pub fn free_map_file_size(&self) -> u32 {
        (self.num_sectors / BITS_IN_BYTE) as u32
    }
}

bitflags! {
    /// Per-subsystem debug switches, selected on the command line with
    /// `-d <mask>` (single characters, `+` for everything).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u8 {
        /// Thread lifecycle and context switches (`t`)
        const THREAD = 1 << 0;
        /// Scheduler queue traffic, the scrapeable trace lines (`c`)
        const SCHED = 1 << 1;
        /// File system operations (`f`)
        const FILESYS = 1 << 2;
        /// Raw sector traffic (`d`)
        const DISK = 1 << 3;
    }
}

impl DebugFlags {
    /// Parse a mask string of single-character flags; `+` enables all.
    pub fn from_mask(mask: &str) -> Self {
        let mut flags = DebugFlags::empty();
        for c in mask.chars() {
            match c {
                't' => flags |= DebugFlags::THREAD,
                'c' => flags |= DebugFlags::SCHED,
                'f' => flags |= DebugFlags::FILESYS,
                'd' => flags |= DebugFlags::DISK,
                '+' => flags = DebugFlags::all(),
                _ => {}
            }
        }
        flags
    }

    /// Tracing filter directives for the enabled subsystems, appended to
    /// the base level.
    pub fn filter_directives(&self, base: &str) -> String {
        let mut directives = vec![base.to_string()];
        if self.contains(DebugFlags::THREAD) {
            directives.push("nucleon::thread=debug".into());
        }
        if self.contains(DebugFlags::SCHED) {
            directives.push("nucleon::sched=debug".into());
        }
        if self.contains(DebugFlags::FILESYS) {
            directives.push("nucleon::fs=debug".into());
        }
        if self.contains(DebugFlags::DISK) {
            directives.push("nucleon::disk=debug".into());
        }
        directives.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = MachineConfig::default();
        assert_eq!(config.num_sectors, 1024);
        assert!(config.disk_image.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_large_config() {
        let config = MachineConfig::large();
        assert_eq!(config.num_sectors, 32768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_geometry() {
        let config = MachineConfig {
            num_sectors: 12,
            ..MachineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = tempdir().unwrap();
        let config_path = tmp.path().join("machine.json");

        let config = MachineConfig::large();
        config.save(&config_path).unwrap();

        let loaded = MachineConfig::load(&config_path).unwrap();
        assert_eq!(loaded.num_sectors, config.num_sectors);
        assert_eq!(loaded.timer_interval, config.timer_interval);
    }

    #[test]
    fn test_debug_mask() {
        let flags = DebugFlags::from_mask("cf");
        assert!(flags.contains(DebugFlags::SCHED));
        assert!(flags.contains(DebugFlags::FILESYS));
        assert!(!flags.contains(DebugFlags::DISK));

        assert_eq!(DebugFlags::from_mask("+"), DebugFlags::all());
    }

    #[test]
    fn test_filter_directives() {
        let flags = DebugFlags::from_mask("c");
        let filter = flags.filter_directives("info");
        assert_eq!(filter, "info,nucleon::sched=debug");
    }
}
