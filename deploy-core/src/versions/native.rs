//! Embedded version history.
//!
//! Layout under `<site>/.versions/`:
//!
//! ```text
//! objects/<hash>       file contents, addressed by content hash
//! commits/<id>.json    one record per version, pointing at its parent
//! HEAD                 id of the newest version
//! ```
//!
//! Every write goes to a temporary file that is renamed into place, and the
//! commit record is on disk before HEAD moves to it, so an interrupted
//! commit leaves the previous history intact.

use super::{VersionBackend, VersionRecord};
use crate::fs::{hash, paths, walker};
use crate::utils::errors::{DeployError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const HISTORY_DIR: &str = ".versions";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitRecord {
    id: String,
    parent: Option<String>,
    message: String,
    author: String,
    date: DateTime<Utc>,
    /// path -> object hash
    files: BTreeMap<String, String>,
}

impl From<&CommitRecord> for VersionRecord {
    fn from(commit: &CommitRecord) -> Self {
        VersionRecord {
            id: commit.id.clone(),
            message: commit.message.clone(),
            author: commit.author.clone(),
            date: commit.date,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Paths of one site's history store.
struct Repo {
    site_dir: PathBuf,
    root: PathBuf,
}

impl Repo {
    fn open(site_dir: &Path) -> Self {
        Self {
            site_dir: site_dir.to_path_buf(),
            root: site_dir.join(HISTORY_DIR),
        }
    }

    fn objects(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn commits(&self) -> PathBuf {
        self.root.join("commits")
    }

    fn head_path(&self) -> PathBuf {
        self.root.join("HEAD")
    }

    fn init(&self) -> Result<()> {
        fs::create_dir_all(self.objects())?;
        fs::create_dir_all(self.commits())?;
        Ok(())
    }

    fn head(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.head_path()) {
            Ok(id) => {
                let id = id.trim();
                Ok(if id.is_empty() { None } else { Some(id.to_string()) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_head(&self, id: &str) -> Result<()> {
        write_atomic(&self.root, &self.head_path(), id.as_bytes())
    }

    fn load_commit(&self, id: &str) -> Result<CommitRecord> {
        let path = self.commits().join(format!("{}.json", id));
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::NotFound(format!("version {}", id))
            } else {
                DeployError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn head_files(&self) -> Result<BTreeMap<String, String>> {
        match self.head()? {
            Some(id) => Ok(self.load_commit(&id)?.files),
            None => Ok(BTreeMap::new()),
        }
    }

    fn working_files(&self) -> Result<BTreeMap<String, String>> {
        Ok(walker::fingerprint(&self.site_dir)?
            .into_files()
            .into_iter()
            .map(|r| (r.path, r.hash))
            .collect())
    }

    fn has_changes(&self) -> Result<bool> {
        Ok(self.working_files()? != self.head_files()?)
    }

    fn commit(&self, message: &str, author: &str) -> Result<VersionRecord> {
        self.init()?;
        let files = self.working_files()?;
        let parent = self.head()?;
        if files == self.head_files()? && parent.is_some() {
            return Err(DeployError::NoChanges);
        }

        for (path, digest) in &files {
            let object = self.objects().join(digest);
            if object.exists() {
                continue;
            }
            let data = fs::read(paths::safe_join(&self.site_dir, path)?)?;
            // The file may have changed since it was fingerprinted.
            if hash::hash_bytes(&data) != *digest {
                return Err(DeployError::VersionControl(format!("{} changed during commit", path)));
            }
            write_atomic(&self.objects(), &object, &data)?;
        }

        let date = Utc::now();
        let id_source = format!(
            "{}\0{}\0{}\0{}\0{}",
            parent.as_deref().unwrap_or_default(),
            message,
            author,
            date.timestamp_nanos_opt().unwrap_or_default(),
            serde_json::to_string(&files)?
        );
        let commit = CommitRecord {
            id: hash::hash_bytes(id_source.as_bytes()),
            parent,
            message: message.to_string(),
            author: author.to_string(),
            date,
            files,
        };

        let record_path = self.commits().join(format!("{}.json", commit.id));
        write_atomic(&self.commits(), &record_path, &serde_json::to_vec_pretty(&commit)?)?;
        self.set_head(&commit.id)?;

        Ok(VersionRecord::from(&commit))
    }

    fn log(&self, limit: usize) -> Result<Vec<VersionRecord>> {
        let mut records = Vec::new();
        let mut next = self.head()?;
        while let Some(id) = next {
            if records.len() >= limit {
                break;
            }
            let commit = self.load_commit(&id)?;
            records.push(VersionRecord::from(&commit));
            next = commit.parent;
        }
        Ok(records)
    }

    fn resolve(&self, version: &str) -> Result<Option<String>> {
        let dir = self.commits();
        if dir.join(format!("{}.json", version)).is_file() {
            return Ok(Some(version.to_string()));
        }
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut matches = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                if id.starts_with(version) {
                    matches.push(id.to_string());
                }
            }
        }
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(DeployError::InvalidInput(format!("ambiguous version id: {}", version))),
        }
    }

    /// Rewrite the visible part of the working tree to match `id`.
    fn materialize(&self, id: &str) -> Result<()> {
        let commit = self.load_commit(id)?;

        for entry in fs::read_dir(&self.site_dir)? {
            let entry = entry?;
            if paths::is_hidden(&entry.file_name()) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }

        for (path, digest) in &commit.files {
            let target = paths::safe_join(&self.site_dir, path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(self.objects().join(digest), &target).map_err(|e| {
                DeployError::VersionControl(format!("missing object {} for {}: {}", digest, path, e))
            })?;
        }
        Ok(())
    }
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| DeployError::Io(e.error))?;
    Ok(())
}

async fn blocking<T, F>(site_dir: &Path, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Repo) -> Result<T> + Send + 'static,
{
    let repo = Repo::open(site_dir);
    tokio::task::spawn_blocking(move || f(repo))
        .await
        .map_err(|e| DeployError::VersionControl(format!("history task failed: {}", e)))?
}

#[async_trait]
impl VersionBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn history_dir(&self) -> &'static str {
        HISTORY_DIR
    }

    /// Blocking work keeps running after its future is dropped.
    fn stops_on_cancel(&self) -> bool {
        false
    }

    async fn init(&self, site_dir: &Path) -> Result<()> {
        blocking(site_dir, |repo| repo.init()).await
    }

    async fn has_changes(&self, site_dir: &Path) -> Result<bool> {
        blocking(site_dir, |repo| repo.has_changes()).await
    }

    async fn commit(&self, site_dir: &Path, message: &str, author: &str) -> Result<VersionRecord> {
        let message = message.to_string();
        let author = author.to_string();
        blocking(site_dir, move |repo| repo.commit(&message, &author)).await
    }

    async fn log(&self, site_dir: &Path, limit: usize) -> Result<Vec<VersionRecord>> {
        blocking(site_dir, move |repo| repo.log(limit)).await
    }

    async fn resolve(&self, site_dir: &Path, version: &str) -> Result<Option<String>> {
        let version = version.to_string();
        blocking(site_dir, move |repo| repo.resolve(&version)).await
    }

    async fn checkout_path(&self, site_dir: &Path, version: &str) -> Result<()> {
        let version = version.to_string();
        blocking(site_dir, move |repo| repo.materialize(&version)).await
    }

    async fn reset_hard(&self, site_dir: &Path, version: &str) -> Result<()> {
        let version = version.to_string();
        blocking(site_dir, move |repo| {
            repo.materialize(&version)?;
            repo.set_head(&version)
        })
        .await
    }
}
