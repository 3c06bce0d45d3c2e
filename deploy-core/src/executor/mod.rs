//! Deployment orchestrator.
//!
//! Ties the pieces together: fingerprint the local tree, diff it against the
//! last deployed snapshot, package what changed, hand it to a transport and,
//! only once the transport confirms, remember the new snapshot.

pub mod transport;

use crate::archive::{pack_to_vec, PackSelection};
use crate::fs::walker::fingerprint;
use crate::sync::delta::{diff, DeltaSet};
use crate::sync::snapshot::Snapshot;
use crate::sync::tracking::SnapshotStore;
use crate::utils::errors::{DeployError, Result};
use crate::versions::VersionRecord;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use transport::{DeployReceipt, DeployTransport, LocalTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    Full,
    Incremental,
    /// Nothing changed; the transport was not contacted
    NoOp,
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Full => write!(f, "full"),
            DeployMode::Incremental => write!(f, "incremental"),
            DeployMode::NoOp => write!(f, "no-op"),
        }
    }
}

/// What a deploy would do, computed without contacting the transport.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub current: Snapshot,
    /// Last deployed snapshot, `None` before the first deploy
    pub previous: Option<Snapshot>,
    pub delta: DeltaSet,
}

impl DeployPlan {
    pub fn mode(&self) -> DeployMode {
        match &self.previous {
            None => DeployMode::Full,
            Some(_) if self.delta.is_empty() => DeployMode::NoOp,
            Some(_) => DeployMode::Incremental,
        }
    }
}

/// Result of one deploy.
#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub site: String,
    pub mode: DeployMode,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Files in the local tree
    pub files_total: usize,
    /// Compressed archive size
    pub archive_bytes: u64,
    pub versioned: bool,
    pub version: Option<VersionRecord>,
    pub duration: Duration,
}

/// Default message for deploys started without one.
pub fn default_message() -> String {
    format!("Deploy at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Runs deploys of local directories through a transport.
pub struct Deployer<T: DeployTransport> {
    transport: T,
    snapshots: SnapshotStore,
}

impl<T: DeployTransport> Deployer<T> {
    pub fn new(transport: T, snapshots: SnapshotStore) -> Self {
        Self { transport, snapshots }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Fingerprint `root` and diff it against the last deployed snapshot.
    pub async fn plan(&self, site: &str, root: &Path) -> Result<DeployPlan> {
        let previous = self.snapshots.load(site)?;
        let current = fingerprint_blocking(root).await?;
        let delta = match &previous {
            Some(previous) => diff(&current, previous),
            None => DeltaSet::all_added(&current),
        };
        Ok(DeployPlan { current, previous, delta })
    }

    /// Deploy only what changed since the last successful deploy.
    ///
    /// Falls back to a full deploy when no previous snapshot exists. An
    /// unchanged tree returns a [`DeployMode::NoOp`] summary.
    pub async fn deploy(&self, site: &str, root: &Path, message: Option<&str>) -> Result<DeploySummary> {
        let started = Instant::now();
        let plan = self.plan(site, root).await?;
        let message = resolve_message(message);

        match plan.mode() {
            DeployMode::Full => {
                info!(site = %site, files = plan.current.len(), "No previous snapshot, running full deploy");
                self.run_full(site, root, &message, plan.current, started).await
            }
            DeployMode::NoOp => {
                info!(site = %site, "No changes to deploy");
                Ok(DeploySummary {
                    site: site.to_string(),
                    mode: DeployMode::NoOp,
                    added: 0,
                    modified: 0,
                    deleted: 0,
                    files_total: plan.current.len(),
                    archive_bytes: 0,
                    versioned: false,
                    version: None,
                    duration: started.elapsed(),
                })
            }
            DeployMode::Incremental => {
                let DeployPlan { current, delta, .. } = plan;
                info!(
                    site = %site,
                    added = delta.added.len(),
                    modified = delta.modified.len(),
                    deleted = delta.deleted.len(),
                    "Running incremental deploy"
                );

                let archive = pack_blocking(root, PackSelection::Files(delta.files_to_package())).await?;
                let archive_bytes = archive.len() as u64;
                let receipt = self
                    .transport
                    .upload_incremental(site, &message, archive, delta.deleted.clone())
                    .await?;
                self.snapshots.save(site, &current)?;

                Ok(DeploySummary {
                    site: site.to_string(),
                    mode: DeployMode::Incremental,
                    added: delta.added.len(),
                    modified: delta.modified.len(),
                    deleted: delta.deleted.len(),
                    files_total: current.len(),
                    archive_bytes,
                    versioned: receipt.versioned,
                    version: receipt.version,
                    duration: started.elapsed(),
                })
            }
        }
    }

    /// Ship the whole tree regardless of tracking state.
    pub async fn deploy_full(&self, site: &str, root: &Path, message: Option<&str>) -> Result<DeploySummary> {
        let started = Instant::now();
        let current = fingerprint_blocking(root).await?;
        self.run_full(site, root, &resolve_message(message), current, started).await
    }

    async fn run_full(
        &self,
        site: &str,
        root: &Path,
        message: &str,
        current: Snapshot,
        started: Instant,
    ) -> Result<DeploySummary> {
        let archive = pack_blocking(root, PackSelection::All).await?;
        let archive_bytes = archive.len() as u64;
        debug!(site = %site, archive_bytes, "Packed full archive");

        let receipt = self.transport.upload_full(site, message, archive).await?;
        self.snapshots.save(site, &current)?;

        Ok(DeploySummary {
            site: site.to_string(),
            mode: DeployMode::Full,
            added: current.len(),
            modified: 0,
            deleted: 0,
            files_total: current.len(),
            archive_bytes,
            versioned: receipt.versioned,
            version: receipt.version,
            duration: started.elapsed(),
        })
    }
}

fn resolve_message(message: Option<&str>) -> String {
    message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(default_message)
}

async fn fingerprint_blocking(root: &Path) -> Result<Snapshot> {
    let root: PathBuf = root.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint(&root))
        .await
        .map_err(|e| DeployError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

async fn pack_blocking(root: &Path, selection: PackSelection) -> Result<Vec<u8>> {
    let root: PathBuf = root.to_path_buf();
    tokio::task::spawn_blocking(move || pack_to_vec(&root, &selection))
        .await
        .map_err(|e| DeployError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
