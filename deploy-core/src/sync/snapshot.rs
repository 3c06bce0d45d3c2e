//! Snapshot types for incremental deployment.
//!
//! A snapshot records every tracked file of a site with its content hash,
//! size and modification time. The client diffs the current tree against
//! the last deployed snapshot and only ships what changed.

use crate::utils::errors::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Slash-separated path relative to the site root
    pub path: String,
    /// Hex content digest
    pub hash: String,
    pub size: u64,
    /// Source modification time (informational only, never used for diffing)
    #[serde(rename = "mod_time")]
    pub modified: DateTime<Utc>,
}

/// A site's complete set of file records at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    files: Vec<FileRecord>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot taken now.
    ///
    /// # Errors
    /// Returns `InvalidInput` when two records share a path.
    pub fn new(files: Vec<FileRecord>) -> Result<Self> {
        Self::with_time(files, Utc::now())
    }

    /// Build a snapshot with an explicit timestamp (used when loading
    /// persisted tracking state).
    pub fn with_time(mut files: Vec<FileRecord>, taken_at: DateTime<Utc>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(files.len());
        for record in &files {
            if !seen.insert(record.path.as_str()) {
                return Err(DeployError::InvalidInput(format!(
                    "duplicate path in snapshot: {}",
                    record.path
                )));
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { files, taken_at })
    }

    /// An empty snapshot, as if nothing had ever been deployed.
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn into_files(self) -> Vec<FileRecord> {
        self.files
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a record by path.
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|r| r.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Sorted list of tracked paths.
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|r| r.path.as_str()).collect()
    }

    /// Path → record index.
    pub fn index(&self) -> BTreeMap<&str, &FileRecord> {
        self.files.iter().map(|r| (r.path.as_str(), r)).collect()
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|r| r.size).sum()
    }
}
