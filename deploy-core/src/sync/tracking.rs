//! Persistent tracking state: the last successfully deployed snapshot of
//! each site.
//!
//! One JSON record per site lives in the tracking directory, independent of
//! the deployed tree itself. A missing record is the normal first-deploy
//! condition and is reported as `Ok(None)`, never as an error.

use crate::fs::paths;
use crate::sync::snapshot::{FileRecord, Snapshot};
use crate::utils::errors::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk tracking record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingData {
    pub site_name: String,
    pub last_sync: DateTime<Utc>,
    pub files: Vec<FileRecord>,
}

/// Loads and saves per-site snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tracking_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(tracking_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracking_dir: tracking_dir.into(),
        }
    }

    pub fn tracking_dir(&self) -> &Path {
        &self.tracking_dir
    }

    fn record_path(&self, site: &str) -> Result<PathBuf> {
        if !paths::is_valid_site_name(site) {
            return Err(DeployError::InvalidInput(format!("invalid site name: {:?}", site)));
        }
        Ok(self.tracking_dir.join(format!("{}.json", site)))
    }

    /// Load the last saved snapshot for `site`, or `None` if the site has
    /// never been deployed from this machine.
    pub fn load(&self, site: &str) -> Result<Option<Snapshot>> {
        let path = self.record_path(site)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let data: TrackingData = serde_json::from_str(&content)?;
        if data.site_name != site {
            return Err(DeployError::InvalidInput(format!(
                "tracking file {} belongs to site {:?}",
                path.display(),
                data.site_name
            )));
        }

        Ok(Some(Snapshot::with_time(data.files, data.last_sync)?))
    }

    /// Replace the stored snapshot for `site`.
    ///
    /// The record is written to a temporary file and renamed into place, so
    /// a crash mid-write leaves the previous record intact.
    pub fn save(&self, site: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.record_path(site)?;
        std::fs::create_dir_all(&self.tracking_dir)?;

        let data = TrackingData {
            site_name: site.to_string(),
            last_sync: snapshot.taken_at(),
            files: snapshot.files().to_vec(),
        };
        let json = serde_json::to_vec_pretty(&data)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.tracking_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| DeployError::Io(e.error))?;

        tracing::debug!(site = %site, files = snapshot.len(), "Saved tracking snapshot");
        Ok(())
    }

    /// Forget the tracking state of `site`. Missing state is not an error.
    pub fn remove(&self, site: &str) -> Result<bool> {
        let path = self.record_path(site)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
