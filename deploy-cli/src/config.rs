//! Configuration for the deploy client.
//!
//! Loaded from `~/.sitedeploy/config.toml` with `SITEDEPLOY_*` environment
//! overrides (`SITEDEPLOY_SERVER_URL`, `SITEDEPLOY_USERNAME`, ...).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_NAME: &str = ".sitedeploy";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const TRACKING_DIR_NAME: &str = "tracking";
pub const ENV_PREFIX: &str = "SITEDEPLOY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL, including the `/api` prefix
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Legacy shared key, sent instead of user credentials when set
    #[serde(default)]
    pub api_key: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Site name -> local publish directory
    #[serde(default)]
    pub site_paths: BTreeMap<String, PathBuf>,
}

fn default_server_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            log_level: default_log_level(),
            site_paths: BTreeMap::new(),
        }
    }
}

/// Where the client keeps its files.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    /// `~/.sitedeploy`
    pub fn from_home() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("cannot determine the home directory")?;
        Ok(Self::new(home.join(CONFIG_DIR_NAME)))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn tracking_dir(&self) -> PathBuf {
        self.root.join(TRACKING_DIR_NAME)
    }
}

impl ClientConfig {
    /// Load the config file (missing is fine) layered with environment
    /// overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("reading {}", path.display()))?;

        let mut config: ClientConfig = settings
            .try_deserialize()
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.server_url.trim().is_empty() {
            config.server_url = default_server_url();
        }
        Ok(config)
    }

    /// Write the config as TOML, creating the directory if needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Set a plain key (`server`, `username`, `password`, `api_key`,
    /// `log_level`).
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim().to_string();
        match key {
            "server" | "server_url" => self.server_url = value.trim_end_matches('/').to_string(),
            "username" => self.username = value,
            "password" => self.password = value,
            "api_key" | "api-key" => self.api_key = value,
            "log_level" | "log-level" => self.log_level = value,
            other => anyhow::bail!(
                "unknown config key {:?} (expected server, username, password, api_key, log_level)",
                other
            ),
        }
        Ok(())
    }

    /// Reset a plain key to its default.
    pub fn unset(&mut self, key: &str) -> anyhow::Result<()> {
        let defaults = ClientConfig::default();
        match key {
            "server" | "server_url" => self.server_url = defaults.server_url,
            "username" => self.username.clear(),
            "password" => self.password.clear(),
            "api_key" | "api-key" => self.api_key.clear(),
            "log_level" | "log-level" => self.log_level = defaults.log_level,
            other => anyhow::bail!("unknown config key {:?}", other),
        }
        Ok(())
    }

    /// Remember the publish directory of `site`.
    pub fn set_site_path(&mut self, site: &str, dir: &Path) -> anyhow::Result<PathBuf> {
        let absolute = std::path::absolute(dir).with_context(|| format!("resolving {}", dir.display()))?;
        self.site_paths.insert(site.to_string(), absolute.clone());
        Ok(absolute)
    }

    pub fn remove_site_path(&mut self, site: &str) -> Option<PathBuf> {
        self.site_paths.remove(site)
    }

    /// Sites whose publish directory relates to `cwd`.
    ///
    /// Directories containing `cwd` win; only when there are none are
    /// directories below `cwd` considered.
    pub fn sites_matching(&self, cwd: &Path) -> Vec<String> {
        let mut containing = Vec::new();
        let mut below = Vec::new();
        for (site, dir) in &self.site_paths {
            let Ok(dir) = std::path::absolute(dir) else {
                continue;
            };
            if cwd.starts_with(&dir) {
                containing.push(site.clone());
            } else if dir.starts_with(cwd) {
                below.push(site.clone());
            }
        }
        if containing.is_empty() {
            below
        } else {
            containing
        }
    }
}
