//! Path Resolution
//!
//! Walks slash-separated paths from the root directory file. The walk
//! borrows the path and yields owned component names; the input is never
//! mutated. Leading and doubled slashes are insignificant, so `/a/b` and
//! `a/b` name the same target.
//!
//! A component that names a regular file where a directory is required
//! fails the walk. Intermediate directory handles are dropped as the walk
//! descends; the root handle is owned by the file system and outlives
//! every walk.

use std::sync::Arc;

use crate::error::{OsError, OsResult};
use crate::machine::SynchDisk;

use super::directory::Directory;
use super::openfile::OpenFile;

/// How a missing intermediate component is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResolveMode {
    /// Creation walk: the first missing component becomes the target in
    /// the directory reached so far, and the rest of the path is ignored
    Create,
    /// Lookup walk: every intermediate component must exist
    Strict,
}

/// A resolved parent directory plus the final component name
pub(super) struct ResolvedParent {
    /// The directory that holds (or will hold) the target
    pub dir: Directory,
    /// Open handle on that directory's backing file
    pub dir_file: OpenFile,
    /// The target's name within `dir`
    pub name: String,
}

/// Split a path into its non-empty components
pub(super) fn components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Walk to the directory that holds the path's final component
pub(super) fn resolve_parent(
    disk: &Arc<SynchDisk>,
    root: &OpenFile,
    path: &str,
    mode: ResolveMode,
) -> OsResult<ResolvedParent> {
    let comps = components(path);
    if comps.is_empty() {
        return Err(OsError::NotFound(path.to_string()));
    }

    let mut dir_file = root.clone();
    let mut dir = Directory::new();
    dir.fetch_from(&dir_file);

    let last = comps.len() - 1;
    for (i, name) in comps.into_iter().enumerate() {
        if i == last {
            return Ok(ResolvedParent {
                dir,
                dir_file,
                name,
            });
        }
        match dir.lookup(&name) {
            None => match mode {
                ResolveMode::Create => {
                    return Ok(ResolvedParent {
                        dir,
                        dir_file,
                        name,
                    })
                }
                ResolveMode::Strict => return Err(OsError::NotFound(name)),
            },
            Some((_, true)) => return Err(OsError::NotADirectory(name)),
            Some((sector, false)) => {
                dir_file = OpenFile::open(disk.clone(), sector);
                dir.fetch_from(&dir_file);
            }
        }
    }
    unreachable!("loop returns at the final component")
}

/// Walk the whole path as directories; an empty path is the root
pub(super) fn resolve_directory(
    disk: &Arc<SynchDisk>,
    root: &OpenFile,
    path: &str,
) -> OsResult<(Directory, OpenFile)> {
    let mut dir_file = root.clone();
    let mut dir = Directory::new();
    dir.fetch_from(&dir_file);

    for name in components(path) {
        match dir.lookup(&name) {
            None => return Err(OsError::NotFound(name)),
            Some((_, true)) => return Err(OsError::NotADirectory(name)),
            Some((sector, false)) => {
                dir_file = OpenFile::open(disk.clone(), sector);
                dir.fetch_from(&dir_file);
            }
        }
    }
    Ok((dir, dir_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_ignore_extra_slashes() {
        assert_eq!(components("/a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(components("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(components("//a//b/"), vec!["a", "b"]);
        assert!(components("/").is_empty());
        assert!(components("").is_empty());
    }
}
