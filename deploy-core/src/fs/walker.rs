//! Directory traversal and content fingerprinting.
//!
//! The walker skips hidden entries (and the whole subtree of a hidden
//! directory), never follows symbolic links, and reports paths in the
//! slash-separated form used by snapshots and archives.

use crate::fs::{hash, metadata, paths};
use crate::sync::snapshot::{FileRecord, Snapshot};
use crate::utils::errors::{DeployError, Result};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Report directories as well as files
    pub include_dirs: bool,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path on disk
    pub path: PathBuf,

    /// Slash-separated path relative to the root
    pub relative_path: String,

    /// Is this a directory?
    pub is_dir: bool,
}

/// Walk a directory tree and collect regular files (and directories when
/// `include_dirs` is set), sorted by path.
///
/// # Errors
/// Any unreadable directory or entry aborts the walk.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Result<Vec<FileInfo>> {
    let mut entries = Vec::new();
    walk_directory_with_callback(root, options, |info| entries.push(info))?;
    Ok(entries)
}

fn walk_directory_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F) -> Result<()>
where
    F: FnMut(FileInfo),
{
    let root_meta = std::fs::metadata(root).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeployError::NotFound(format!("directory {}", root.display()))
        } else {
            DeployError::Io(e)
        }
    })?;
    if !root_meta.is_dir() {
        return Err(DeployError::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let iter = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !(entry.depth() > 0 && paths::is_hidden(entry.file_name())));

    for entry in iter {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            if options.include_dirs {
                callback(FileInfo::from_entry(&entry, root, true)?);
            }
        } else if file_type.is_file() {
            callback(FileInfo::from_entry(&entry, root, false)?);
        }
        // Symlinks and special files are neither tracked nor packaged.
    }

    Ok(())
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path, is_dir: bool) -> Result<Self> {
        let path = entry.path().to_path_buf();
        let relative = path.strip_prefix(root).map_err(|_| {
            DeployError::PathEscape(path.display().to_string())
        })?;

        Ok(Self {
            relative_path: paths::to_slash_path(relative)?,
            path,
            is_dir,
        })
    }
}

/// Fingerprint every visible regular file under `root` into a Snapshot.
///
/// # Errors
/// Fails on the first unreadable file or directory; a partial snapshot is
/// never returned.
pub fn fingerprint(root: &Path) -> Result<Snapshot> {
    let files = walk_directory(root, &WalkOptions::default())?
        .into_iter()
        .map(|info| -> Result<FileRecord> {
            let meta = std::fs::metadata(&info.path)?;
            let hash = hash::hash_file(&info.path)?;
            Ok(FileRecord {
                path: info.relative_path,
                hash,
                size: meta.len(),
                modified: metadata::modified_utc(&meta),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(root = %root.display(), files = files.len(), "Fingerprinted directory");
    Snapshot::new(files)
}
