use deploy_core::versions::BackendKind;
use std::path::PathBuf;
use std::time::Duration;

/// How incoming static requests are mapped to sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// `<site>.<base_domain>`
    Subdomain,
    /// `<host>/<site>/...`
    Path,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub web_root: PathBuf,
    pub registry_path: PathBuf,
    pub mode: DeployMode,
    pub base_domain: String,
    pub single_domain: Option<String>,
    pub enable_versioning: bool,
    pub version_backend: BackendKind,
    pub vcs_timeout: Duration,
    pub max_upload_bytes: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mode = match std::env::var("DEPLOY_MODE").as_deref() {
            Ok("path") => DeployMode::Path,
            _ => DeployMode::Subdomain,
        };
        let version_backend = std::env::var("VERSION_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(BackendKind::Native);

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            web_root: PathBuf::from(std::env::var("WEB_ROOT").unwrap_or_else(|_| "./websites".into())),
            registry_path: PathBuf::from(
                std::env::var("REGISTRY_PATH").unwrap_or_else(|_| "./data/registry.json".into()),
            ),
            mode,
            base_domain: std::env::var("BASE_DOMAIN").unwrap_or_else(|_| "example.com".into()),
            single_domain: std::env::var("SINGLE_DOMAIN").ok().filter(|v| !v.trim().is_empty()),
            enable_versioning: std::env::var("ENABLE_VERSIONING")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            version_backend,
            vcs_timeout: Duration::from_secs(
                std::env::var("VCS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            max_upload_bytes: std::env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(256)
                * 1024
                * 1024,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Public domain and URL of a site.
    pub fn site_address(&self, site: &str) -> (String, String) {
        let port = match self.port {
            80 | 443 => String::new(),
            p => format!(":{}", p),
        };
        match self.mode {
            DeployMode::Subdomain => {
                let domain = format!("{}.{}{}", site, self.base_domain, port);
                let url = format!("http://{}", domain);
                (domain, url)
            }
            DeployMode::Path => {
                let host = self.single_domain.as_deref().unwrap_or(&self.base_domain);
                let domain = format!("{}{}/{}", host, port, site);
                let url = format!("http://{}/", domain);
                (domain, url)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(web_root: PathBuf, registry_path: PathBuf) -> AppConfig {
    AppConfig {
        port: 8080,
        web_root,
        registry_path,
        mode: DeployMode::Path,
        base_domain: "example.com".into(),
        single_domain: None,
        enable_versioning: true,
        version_backend: BackendKind::Native,
        vcs_timeout: Duration::from_secs(30),
        max_upload_bytes: 16 * 1024 * 1024,
        log_level: "info".into(),
    }
}
