//! Per-site version history.
//!
//! [`VersionStore`] implements commit / list / restore on top of a
//! [`VersionBackend`]. Two backends exist: [`git::GitBackend`] drives the
//! `git` binary, [`native::NativeBackend`] keeps a small content-addressed
//! store inside the site directory. History is append-only; a restore
//! records a new version instead of moving the head backwards.

pub mod git;
pub mod native;

use crate::utils::errors::{DeployError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub use git::GitBackend;
pub use native::NativeBackend;

/// Versions returned by `list` when the caller gives no limit.
pub const DEFAULT_LOG_LIMIT: usize = 20;

/// Upper bound on any single history operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message used for the commit taken right before a restore when the
/// working tree has unrecorded changes.
pub const AUTO_SAVE_MESSAGE: &str = "auto-save before restore";

/// One entry of a site's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(rename = "hash")]
    pub id: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

/// Result of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The tree was rewritten and recorded as this new version
    Restored(VersionRecord),
    /// The requested version already matches the working tree
    Unchanged,
}

/// Storage engine behind a [`VersionStore`].
///
/// All paths are site roots. Implementations keep their metadata in
/// [`history_dir`](VersionBackend::history_dir) under that root and must
/// never record hidden entries of the working tree.
#[async_trait]
pub trait VersionBackend: Send + Sync {
    /// Short name for logs ("git", "native").
    fn name(&self) -> &'static str;

    /// Hidden directory under the site root holding the history.
    fn history_dir(&self) -> &'static str;

    fn is_initialized(&self, site_dir: &Path) -> bool {
        site_dir.join(self.history_dir()).is_dir()
    }

    async fn init(&self, site_dir: &Path) -> Result<()>;

    /// Whether the working tree differs from the head version.
    async fn has_changes(&self, site_dir: &Path) -> Result<bool>;

    /// Record the working tree as a new version.
    ///
    /// # Errors
    /// `NoChanges` when the working tree matches the head version.
    async fn commit(&self, site_dir: &Path, message: &str, author: &str) -> Result<VersionRecord>;

    /// Up to `limit` versions, newest first.
    async fn log(&self, site_dir: &Path, limit: usize) -> Result<Vec<VersionRecord>>;

    /// Full id of the version `version` names (a full id or unique prefix).
    async fn resolve(&self, site_dir: &Path, version: &str) -> Result<Option<String>>;

    async fn contains(&self, site_dir: &Path, version: &str) -> Result<bool> {
        Ok(self.resolve(site_dir, version).await?.is_some())
    }

    /// Make the working tree match `version` exactly, without touching the
    /// history.
    async fn checkout_path(&self, site_dir: &Path, version: &str) -> Result<()>;

    /// Move the head to `version` and make the working tree match it.
    async fn reset_hard(&self, site_dir: &Path, version: &str) -> Result<()>;

    /// Whether dropping an in-flight call also stops its work. Backends that
    /// return `false` are awaited to completion after a timeout, so the tree
    /// is settled before the caller releases its site lock.
    fn stops_on_cancel(&self) -> bool {
        true
    }
}

/// Which backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Git,
    Native,
}

impl std::str::FromStr for BackendKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(BackendKind::Git),
            "native" => Ok(BackendKind::Native),
            other => Err(DeployError::InvalidInput(format!("unknown version backend: {}", other))),
        }
    }
}

/// True for strings that can name a version: 4 to 64 lowercase hex digits.
pub fn is_valid_version_id(version: &str) -> bool {
    (4..=64).contains(&version.len()) && version.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Commit / list / restore, each bounded by one deadline across all the
/// backend calls it makes.
#[derive(Clone)]
pub struct VersionStore {
    backend: Arc<dyn VersionBackend>,
    timeout: Duration,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VersionStore {
    pub fn new(backend: Arc<dyn VersionBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Git => Self::new(Arc::new(GitBackend::new())),
            BackendKind::Native => Self::new(Arc::new(NativeBackend::new())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn history_dir(&self) -> &'static str {
        self.backend.history_dir()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    async fn bounded<T, F>(&self, deadline: Instant, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timed_out = DeployError::Timeout(self.timeout.as_secs());
        if Instant::now() >= deadline {
            return Err(timed_out);
        }

        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => result,
            _ = tokio::time::sleep_until(deadline) => {
                if !self.backend.stops_on_cancel() {
                    tracing::warn!(backend = self.backend.name(), "History operation timed out, waiting for it to finish");
                    if let Err(e) = fut.await {
                        tracing::warn!(backend = self.backend.name(), error = %e, "Timed out history operation failed");
                    }
                }
                Err(timed_out)
            }
        }
    }

    /// Initialize history for a site if it has none yet.
    pub async fn init(&self, site_dir: &Path) -> Result<()> {
        self.init_by(site_dir, self.deadline()).await
    }

    async fn init_by(&self, site_dir: &Path, deadline: Instant) -> Result<()> {
        if self.backend.is_initialized(site_dir) {
            return Ok(());
        }
        self.bounded(deadline, self.backend.init(site_dir)).await?;
        tracing::debug!(site_dir = %site_dir.display(), backend = self.backend.name(), "Initialized version history");
        Ok(())
    }

    /// Record the current working tree.
    ///
    /// # Errors
    /// `NoChanges` when nothing differs from the latest version,
    /// `InvalidInput` for an empty message.
    pub async fn commit(&self, site_dir: &Path, message: &str, author: &str) -> Result<VersionRecord> {
        let message = message.trim();
        if message.is_empty() {
            return Err(DeployError::InvalidInput("commit message must not be empty".to_string()));
        }
        let author = normalize_author(author);
        let deadline = self.deadline();

        self.init_by(site_dir, deadline).await?;
        if !self.bounded(deadline, self.backend.has_changes(site_dir)).await? {
            return Err(DeployError::NoChanges);
        }
        let record = self.bounded(deadline, self.backend.commit(site_dir, message, &author)).await?;

        tracing::info!(
            site_dir = %site_dir.display(),
            version = %record.id,
            author = %record.author,
            "Committed version"
        );
        Ok(record)
    }

    /// Newest-first history, at most `limit` entries (default 20). A site
    /// without history has an empty list.
    pub async fn list(&self, site_dir: &Path, limit: Option<usize>) -> Result<Vec<VersionRecord>> {
        if !self.backend.is_initialized(site_dir) {
            return Ok(Vec::new());
        }
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LOG_LIMIT);
        self.bounded(self.deadline(), self.backend.log(site_dir, limit)).await
    }

    /// Make the working tree match `version` and record that as a new
    /// version.
    ///
    /// Unrecorded working-tree changes are first committed under
    /// [`AUTO_SAVE_MESSAGE`] so nothing is lost. Restoring a version that
    /// already matches the tree appends nothing and returns
    /// [`RestoreOutcome::Unchanged`].
    ///
    /// # Errors
    /// `InvalidInput` for a malformed id, `NotFound` for an unknown one.
    pub async fn restore(&self, site_dir: &Path, version: &str, message: Option<&str>, author: &str) -> Result<RestoreOutcome> {
        let version = version.trim().to_ascii_lowercase();
        if !is_valid_version_id(&version) {
            return Err(DeployError::InvalidInput(format!("invalid version id: {:?}", version)));
        }
        if !self.backend.is_initialized(site_dir) {
            return Err(DeployError::NotFound(format!("version {}", version)));
        }
        let deadline = self.deadline();
        let target = self
            .bounded(deadline, self.backend.resolve(site_dir, &version))
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("version {}", version)))?;

        let author = normalize_author(author);
        if self.bounded(deadline, self.backend.has_changes(site_dir)).await? {
            let saved = self
                .bounded(deadline, self.backend.commit(site_dir, AUTO_SAVE_MESSAGE, &author))
                .await?;
            tracing::info!(site_dir = %site_dir.display(), version = %saved.id, "Auto-saved working tree before restore");
        }

        let head = self
            .bounded(deadline, self.backend.log(site_dir, 1))
            .await?
            .into_iter()
            .next()
            .map(|r| r.id);

        self.bounded(deadline, self.backend.checkout_path(site_dir, &target)).await?;
        if !self.bounded(deadline, self.backend.has_changes(site_dir)).await? {
            tracing::info!(site_dir = %site_dir.display(), version = %target, "Restore target matches working tree");
            return Ok(RestoreOutcome::Unchanged);
        }

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Rollback to {}", short_id(&target)));

        match self.bounded(deadline, self.backend.commit(site_dir, &message, &author)).await {
            Ok(record) => {
                tracing::info!(
                    site_dir = %site_dir.display(),
                    target = %target,
                    version = %record.id,
                    "Restored version"
                );
                Ok(RestoreOutcome::Restored(record))
            }
            Err(e) => {
                if let Some(head) = head {
                    if let Err(reset_err) = self.bounded(self.deadline(), self.backend.reset_hard(site_dir, &head)).await {
                        tracing::error!(site_dir = %site_dir.display(), error = %reset_err, "Failed to reset working tree after failed restore");
                    }
                }
                Err(e)
            }
        }
    }
}

/// First 7 characters of a version id, for messages.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(7)]
}

fn normalize_author(author: &str) -> String {
    let author = author.trim();
    if author.is_empty() {
        "deploy".to_string()
    } else {
        author.to_string()
    }
}
