//! Site and user registry backed by a JSON file.
//!
//! The file is authoritative. The in-memory copy only serves reads and is
//! rebuilt by [`SiteRegistry::reload`]; every change goes through
//! [`SiteRegistry::mutate`], which edits the file's current content, writes
//! it back and reloads.

use crate::error::AppError;
use crate::models::registry::{RegistryData, Site, User};
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

pub struct SiteRegistry {
    path: PathBuf,
    cache: RwLock<RegistryData>,
    /// Serializes read-modify-write cycles on the file
    write_lock: Mutex<()>,
}

impl SiteRegistry {
    /// Open the registry at `path`, creating an empty one if it is missing.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            write_registry(&path, &RegistryData::default())?;
            tracing::info!("Created empty registry at {}", path.display());
        }

        let data = read_registry(&path)?;
        Ok(Self {
            path,
            cache: RwLock::new(data),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the in-memory copy from the file.
    pub fn reload(&self) -> anyhow::Result<()> {
        let data = read_registry(&self.path)?;
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow::anyhow!("registry cache lock poisoned"))?;
        *cache = data;
        Ok(())
    }

    /// Copy of the current registry.
    pub fn data(&self) -> RegistryData {
        match self.cache.read() {
            Ok(cache) => cache.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn site(&self, name: &str) -> Option<Site> {
        self.data().sites.get(name).cloned()
    }

    pub fn user(&self, name: &str) -> Option<User> {
        self.data().users.get(name).cloned()
    }

    /// Apply `f` to the persisted registry, write it and reload.
    ///
    /// When `f` fails nothing is written.
    pub fn mutate<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut RegistryData) -> Result<T, AppError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("registry write lock poisoned"))?;

        let mut data = read_registry(&self.path)?;
        let result = f(&mut data)?;
        write_registry(&self.path, &data)?;
        self.reload()?;
        Ok(result)
    }
}

fn read_registry(path: &Path) -> anyhow::Result<RegistryData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading registry {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(RegistryData::default());
    }
    serde_json::from_str(&content).with_context(|| format!("parsing registry {}", path.display()))
}

fn write_registry(path: &Path, data: &RegistryData) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(data)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("writing registry {}", path.display()))?;
    Ok(())
}
