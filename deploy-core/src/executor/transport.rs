//! Transport seam between the orchestrator and wherever a site lives.

use crate::sync::apply::{apply_full, apply_incremental, apply_single_file, ApplyStats};
use crate::utils::errors::{DeployError, Result};
use crate::versions::{VersionRecord, VersionStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Commit a freshly applied tree to `versions`.
///
/// The content is already live at this point, so a history failure is
/// logged and reported as `versioned: false` instead of failing the deploy.
/// An unchanged tree counts as versioned without a new record.
pub async fn record_version(
    versions: Option<&VersionStore>,
    site_dir: &Path,
    message: &str,
    author: &str,
) -> DeployReceipt {
    let Some(versions) = versions else {
        return DeployReceipt::default();
    };
    match versions.commit(site_dir, message, author).await {
        Ok(record) => DeployReceipt {
            versioned: true,
            version: Some(record),
            ..DeployReceipt::default()
        },
        Err(DeployError::NoChanges) => DeployReceipt {
            versioned: true,
            ..DeployReceipt::default()
        },
        Err(e) => {
            tracing::warn!(site_dir = %site_dir.display(), error = %e, "Deploy applied but not versioned");
            DeployReceipt::default()
        }
    }
}

/// What the receiving side reports after applying an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// Whether the content was recorded in the site's history
    pub versioned: bool,
    /// The recorded version, if a new one was created
    pub version: Option<VersionRecord>,
    #[serde(default)]
    pub files_written: usize,
    #[serde(default)]
    pub files_deleted: usize,
}

impl DeployReceipt {
    fn with_stats(mut self, stats: ApplyStats) -> Self {
        self.files_written = stats.files_written;
        self.files_deleted = stats.files_deleted;
        self
    }
}

/// Ships a packaged archive to a site.
///
/// Success means the receiving side has applied the archive; the
/// orchestrator saves its new snapshot only after that.
#[async_trait]
pub trait DeployTransport: Send + Sync {
    async fn upload_full(&self, site: &str, message: &str, archive: Vec<u8>) -> Result<DeployReceipt>;

    async fn upload_incremental(
        &self,
        site: &str,
        message: &str,
        archive: Vec<u8>,
        deleted: Vec<String>,
    ) -> Result<DeployReceipt>;
}

/// Applies uploads straight to a web root on the local machine.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    web_root: PathBuf,
    versions: Option<VersionStore>,
    author: String,
}

impl LocalTransport {
    pub fn new(web_root: impl Into<PathBuf>) -> Self {
        Self {
            web_root: web_root.into(),
            versions: None,
            author: "deploy".to_string(),
        }
    }

    /// Record every apply in `versions`.
    pub fn with_versions(mut self, versions: VersionStore) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn site_dir(&self, site: &str) -> Result<PathBuf> {
        if !crate::fs::paths::is_valid_site_name(site) {
            return Err(DeployError::InvalidInput(format!("invalid site name: {:?}", site)));
        }
        Ok(self.web_root.join(site))
    }

    fn keep(&self) -> Vec<&'static str> {
        self.versions.iter().map(|v| v.history_dir()).collect()
    }

    async fn record(&self, site: &str, message: &str) -> Result<DeployReceipt> {
        let site_dir = self.site_dir(site)?;
        Ok(record_version(self.versions.as_ref(), &site_dir, message, &self.author).await)
    }

    /// Replace the site's content with one file.
    pub async fn upload_file(&self, site: &str, message: &str, file_name: &str, data: Vec<u8>) -> Result<DeployReceipt> {
        let site_dir = self.site_dir(site)?;
        let keep = self.keep();
        let file_name = file_name.to_string();
        let stats = tokio::task::spawn_blocking(move || apply_single_file(&site_dir, &file_name, &data, &keep))
            .await
            .map_err(|e| DeployError::Transport(e.to_string()))??;
        Ok(self.record(site, message).await?.with_stats(stats))
    }
}

#[async_trait]
impl DeployTransport for LocalTransport {
    async fn upload_full(&self, site: &str, message: &str, archive: Vec<u8>) -> Result<DeployReceipt> {
        let site_dir = self.site_dir(site)?;
        let keep = self.keep();
        let stats = tokio::task::spawn_blocking(move || apply_full(&site_dir, archive.as_slice(), &keep))
            .await
            .map_err(|e| DeployError::Transport(e.to_string()))??;
        Ok(self.record(site, message).await?.with_stats(stats))
    }

    async fn upload_incremental(
        &self,
        site: &str,
        message: &str,
        archive: Vec<u8>,
        deleted: Vec<String>,
    ) -> Result<DeployReceipt> {
        let site_dir = self.site_dir(site)?;
        let stats = tokio::task::spawn_blocking(move || apply_incremental(&site_dir, archive.as_slice(), &deleted))
            .await
            .map_err(|e| DeployError::Transport(e.to_string()))??;
        Ok(self.record(site, message).await?.with_stats(stats))
    }
}
