//! Error types for Nucleon
//!
//! User-visible failures for file system and kernel operations. Precondition
//! violations (interrupts not masked in scheduler code, freeing an unmarked
//! sector, stack-sentinel corruption) are asserts, not errors: they indicate
//! a broken kernel, not a failed request.

use thiserror::Error;

/// Result type for kernel operations
pub type OsResult<T> = Result<T, OsError>;

/// Kernel error types
#[derive(Debug, Error)]
pub enum OsError {
    // ========== File System Errors ==========

    /// Not enough free sectors for an allocation
    #[error("Disk full: {needed} sectors needed, {free} free")]
    DiskFull {
        /// Sectors the allocation required
        needed: u32,
        /// Sectors available at the time of the request
        free: u32,
    },

    /// The target directory has no unused entry slot
    #[error("Directory full")]
    DirectoryFull,

    /// A name already present in the target directory
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Path or final component does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A path component that must be a directory names a regular file
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// The final component names a directory where a file is required
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// File name component exceeds the fixed on-disk limit
    #[error("Name too long: {0}")]
    NameTooLong(String),

    /// Open-file id does not address a live handle
    #[error("Bad open-file id: {0}")]
    BadFileId(i32),

    // ========== Configuration Errors ==========

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Host I/O Errors ==========

    /// Error from the host while backing the simulated disk or copying files
    #[error("Host I/O error: {0}")]
    Io(String),
}
