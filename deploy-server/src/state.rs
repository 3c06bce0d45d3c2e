use crate::config::AppConfig;
use crate::error::AppError;
use crate::services::site_registry::SiteRegistry;
use dashmap::DashMap;
use deploy_core::executor::LocalTransport;
use deploy_core::fs::paths;
use deploy_core::versions::VersionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub struct AppState {
    pub config: AppConfig,
    pub registry: SiteRegistry,
    /// `None` when versioning is disabled
    pub versions: Option<VersionStore>,
    site_locks: DashMap<String, Arc<RwLock<()>>>,
}

impl AppState {
    pub fn new(config: AppConfig, registry: SiteRegistry) -> Self {
        let versions = config.enable_versioning.then(|| {
            VersionStore::from_kind(config.version_backend).with_timeout(config.vcs_timeout)
        });
        Self {
            config,
            registry,
            versions,
            site_locks: DashMap::new(),
        }
    }

    /// Per-site lock: deploys, rollbacks and deletes take it for writing,
    /// history reads and exports for reading.
    fn site_lock(&self, site: &str) -> Arc<RwLock<()>> {
        self.site_locks
            .entry(site.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Exclusive access to a site. Callers re-check the site once the guard
    /// is held, since it may have been deleted while they waited.
    pub async fn write_site(&self, site: &str) -> OwnedRwLockWriteGuard<()> {
        self.site_lock(site).write_owned().await
    }

    pub async fn read_site(&self, site: &str) -> OwnedRwLockReadGuard<()> {
        self.site_lock(site).read_owned().await
    }

    /// Drop the lock of a deleted site unless a request still holds or
    /// waits on it.
    pub fn forget_site(&self, site: &str) {
        self.site_locks.remove_if(site, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Directory of a site under the web root.
    pub fn site_dir(&self, site: &str) -> Result<PathBuf, AppError> {
        if !paths::is_valid_site_name(site) {
            return Err(AppError::BadRequest(format!("Invalid site name: {}", site)));
        }
        Ok(self.config.web_root.join(site))
    }

    /// Applies uploads on behalf of `author`.
    pub fn transport(&self, author: &str) -> LocalTransport {
        let transport = LocalTransport::new(&self.config.web_root).with_author(author);
        match &self.versions {
            Some(versions) => transport.with_versions(versions.clone()),
            None => transport,
        }
    }
}
