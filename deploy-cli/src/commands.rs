//! Command implementations behind the CLI.

use crate::client::{ApiClient, HttpTransport};
use crate::config::{ClientConfig, ConfigPaths};
use crate::progress::{format_bytes, format_duration, plural};
use anyhow::{bail, Context as _};
use deploy_core::executor::{DeployMode, DeploySummary, Deployer};
use deploy_core::fs::{paths, walker};
use deploy_core::sync::{apply_full, SnapshotStore};
use deploy_core::versions::short_id;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Everything a command needs.
pub struct Context {
    pub config: ClientConfig,
    pub paths: ConfigPaths,
    /// Skip confirmation prompts
    pub assume_yes: bool,
}

/// How `deploy` should ship the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKind {
    /// Incremental when tracking state exists, full otherwise
    Smart,
    Full,
    /// Incremental only; fails without tracking state
    Incremental,
}

impl Context {
    pub fn new(config: ClientConfig, paths: ConfigPaths) -> Self {
        Self {
            config,
            paths,
            assume_yes: false,
        }
    }

    fn client(&self) -> ApiClient {
        ApiClient::from_config(&self.config)
    }

    fn deployer(&self) -> Deployer<HttpTransport> {
        Deployer::new(
            HttpTransport::new(self.client()),
            SnapshotStore::new(self.paths.tracking_dir()),
        )
    }

    fn save_config(&self) -> anyhow::Result<()> {
        self.config.save(&self.paths.config_file())
    }

    fn confirm(&self, prompt: &str) -> anyhow::Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        print!("{} (y/N): ", prompt);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Work out which site and directory a command is about.
///
/// An explicit directory wins, then the configured directory of the named
/// site. Without a name the site is matched from `cwd`.
pub fn resolve_target(
    config: &ClientConfig,
    name: Option<&str>,
    dir: Option<&Path>,
    cwd: &Path,
) -> anyhow::Result<(String, PathBuf)> {
    match name {
        Some(name) => {
            let dir = match dir {
                Some(dir) => dir.to_path_buf(),
                None => config.site_paths.get(name).cloned().with_context(|| {
                    format!(
                        "no publish directory configured for {:?}; run `deploy-cli config set site {} <dir>` or pass a directory",
                        name, name
                    )
                })?,
            };
            Ok((name.to_string(), dir))
        }
        None => {
            let matches = config.sites_matching(cwd);
            match matches.as_slice() {
                [] => bail!(
                    "cannot tell which site to use from {}; pass a site name or run `deploy-cli config set site <name> <dir>`",
                    cwd.display()
                ),
                [site] => {
                    let dir = config.site_paths[site].clone();
                    println!("Matched site {} ({})", site, dir.display());
                    Ok((site.clone(), dir))
                }
                many => bail!("{} matches several sites: {}; name one explicitly", cwd.display(), many.join(", ")),
            }
        }
    }
}

fn current_dir() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(std::path::absolute(cwd)?)
}

// ---- config ----

pub fn config_set(ctx: &mut Context, key: &str, value: &str) -> anyhow::Result<()> {
    ctx.config.set(key, value)?;
    ctx.save_config()?;
    if key == "password" {
        println!("✓ password saved");
    } else {
        println!("✓ {} = {}", key, value);
    }
    Ok(())
}

pub fn config_set_site(ctx: &mut Context, site: &str, dir: &Path) -> anyhow::Result<()> {
    if !paths::is_valid_site_name(site) {
        bail!("invalid site name {:?}", site);
    }
    if !dir.is_dir() {
        println!("Warning: directory does not exist yet: {}", dir.display());
    }
    let absolute = ctx.config.set_site_path(site, dir)?;
    ctx.save_config()?;
    println!("✓ site {} publishes from {}", site, absolute.display());
    println!("  `deploy-cli deploy {}` now deploys it directly", site);
    Ok(())
}

pub fn config_remove(ctx: &mut Context, key: &str) -> anyhow::Result<()> {
    ctx.config.unset(key)?;
    ctx.save_config()?;
    println!("✓ {} reset", key);
    Ok(())
}

pub fn config_remove_site(ctx: &mut Context, site: &str) -> anyhow::Result<()> {
    if ctx.config.remove_site_path(site).is_none() {
        bail!("no publish directory configured for {:?}", site);
    }
    ctx.save_config()?;
    println!("✓ removed publish directory of {}", site);
    Ok(())
}

pub fn config_show(ctx: &Context) {
    let config = &ctx.config;
    println!("Server:    {}", config.server_url);
    if !config.username.is_empty() {
        println!("Username:  {}", config.username);
        println!("Password:  {}", if config.password.is_empty() { "(not set)" } else { "********" });
    }
    if !config.api_key.is_empty() {
        println!("API key:   ********");
    }
    println!("Log level: {}", config.log_level);
    if config.site_paths.is_empty() {
        println!("Sites:     (none)");
    } else {
        println!("Sites:");
        for (name, dir) in &config.site_paths {
            println!("  {:<20} -> {}", name, dir.display());
        }
    }
    println!("\nConfig file: {}", ctx.paths.config_file().display());
}

// ---- sites ----

pub async fn create(ctx: &Context, name: &str, desc: &str) -> anyhow::Result<()> {
    let site = ctx.client().create_site(name, desc).await?;
    println!("✓ created {}", site.name);
    println!("  domain: {}", site.domain);
    println!("  url:    {}", site.url);
    Ok(())
}

pub async fn delete(ctx: &Context, name: &str) -> anyhow::Result<()> {
    if !ctx.confirm(&format!("Delete site {:?} and all its content?", name))? {
        println!("Cancelled");
        return Ok(());
    }
    ctx.client().delete_site(name).await?;
    let snapshots = SnapshotStore::new(ctx.paths.tracking_dir());
    if let Err(e) = snapshots.remove(name) {
        tracing::warn!(site = %name, error = %e, "Failed to remove tracking state");
    }
    println!("✓ deleted {}", name);
    Ok(())
}

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let sites = ctx.client().list_sites().await?;
    if sites.is_empty() {
        println!("No sites");
        return Ok(());
    }
    for (i, site) in sites.iter().enumerate() {
        println!("{}. {}  {}", i + 1, site.name, site.url);
        if !site.desc.is_empty() {
            println!("   {}", site.desc);
        }
    }
    Ok(())
}

// ---- deploys ----

pub async fn deploy(
    ctx: &Context,
    name: Option<&str>,
    dir: Option<&Path>,
    message: Option<&str>,
    kind: DeployKind,
) -> anyhow::Result<()> {
    let (site, dir) = resolve_target(&ctx.config, name, dir, &current_dir()?)?;

    if dir.is_file() && kind == DeployKind::Smart {
        return deploy_single_file(ctx, &site, &dir, message).await;
    }
    if !dir.is_dir() {
        bail!("directory does not exist: {}", dir.display());
    }

    let deployer = ctx.deployer();
    let summary = match kind {
        DeployKind::Smart => deployer.deploy(&site, &dir, message).await?,
        DeployKind::Full => deployer.deploy_full(&site, &dir, message).await?,
        DeployKind::Incremental => {
            if deployer.snapshots().load(&site)?.is_none() {
                bail!("{} has no tracking state yet; run `deploy-cli deploy-full {}` first", site, site);
            }
            deployer.deploy(&site, &dir, message).await?
        }
    };
    print_summary(&summary);
    Ok(())
}

async fn deploy_single_file(ctx: &Context, site: &str, file: &Path, message: Option<&str>) -> anyhow::Result<()> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", file.display()))?
        .to_string();
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let message = message
        .map(str::to_string)
        .unwrap_or_else(deploy_core::executor::default_message);

    let receipt = ctx.client().deploy_file(site, &message, &file_name, data).await?;
    // The remote tree no longer matches any directory snapshot.
    SnapshotStore::new(ctx.paths.tracking_dir()).remove(site)?;
    println!("✓ deployed {} to {}", file_name, site);
    if let Some(version) = receipt.version {
        println!("  version {}", short_id(&version.id));
    }
    Ok(())
}

fn print_summary(summary: &DeploySummary) {
    match summary.mode {
        DeployMode::NoOp => {
            println!("✓ {} is up to date ({})", summary.site, plural(summary.files_total, "file"));
            return;
        }
        DeployMode::Full => println!(
            "✓ full deploy of {}: {} ({})",
            summary.site,
            plural(summary.files_total, "file"),
            format_bytes(summary.archive_bytes)
        ),
        DeployMode::Incremental => println!(
            "✓ incremental deploy of {}: {} added, {} modified, {} deleted ({})",
            summary.site,
            summary.added,
            summary.modified,
            summary.deleted,
            format_bytes(summary.archive_bytes)
        ),
    }
    match &summary.version {
        Some(version) => println!("  version {} \"{}\"", short_id(&version.id), version.message),
        None if !summary.versioned => println!("  warning: the server did not record a version"),
        None => {}
    }
    println!("  took {}", format_duration(summary.duration));
}

pub async fn status(ctx: &Context, name: Option<&str>, dir: Option<&Path>) -> anyhow::Result<()> {
    let (site, dir) = resolve_target(&ctx.config, name, dir, &current_dir()?)?;
    let plan = ctx.deployer().plan(&site, &dir).await?;

    println!("Site {} from {}", site, dir.display());
    println!(
        "  {} ({})",
        plural(plan.current.len(), "file"),
        format_bytes(plan.current.total_bytes())
    );
    match &plan.previous {
        None => println!("  never deployed from here; next deploy is full"),
        Some(previous) => {
            println!("  last deploy {}", previous.taken_at().format("%Y-%m-%d %H:%M:%S UTC"));
            if plan.delta.is_empty() {
                println!("  no changes");
            }
            for path in &plan.delta.added {
                println!("  + {}", path);
            }
            for path in &plan.delta.modified {
                println!("  ~ {}", path);
            }
            for path in &plan.delta.deleted {
                println!("  - {}", path);
            }
        }
    }
    Ok(())
}

// ---- history ----

pub async fn versions(ctx: &Context, name: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let records = ctx.client().versions(name, limit).await?;
    if records.is_empty() {
        println!("{} has no recorded versions", name);
        return Ok(());
    }
    println!("Versions of {}:", name);
    for (i, record) in records.iter().enumerate() {
        println!("{}. {}", i + 1, record.id);
        println!("   message: {}", record.message);
        println!("   author:  {}", record.author);
        println!("   date:    {}", record.date.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

pub async fn rollback(ctx: &Context, name: &str, hash: &str, message: Option<&str>) -> anyhow::Result<()> {
    if !ctx.confirm(&format!("Roll {:?} back to {}?", name, short_id(hash)))? {
        println!("Cancelled");
        return Ok(());
    }
    let result = ctx.client().rollback(name, hash, message).await?;
    println!("✓ {}", result.message);
    if result.restored {
        // Local tracking describes what was deployed before the rollback.
        SnapshotStore::new(ctx.paths.tracking_dir()).remove(name)?;
        println!("  the next deploy of {} will be a full deploy", name);
    }
    Ok(())
}

/// Download the live site into its local directory.
pub async fn pull(ctx: &Context, name: Option<&str>, dir: Option<&Path>) -> anyhow::Result<()> {
    let (site, dir) = resolve_target(&ctx.config, name, dir, &current_dir()?)?;
    if !ctx.confirm(&format!(
        "Replace the content of {} with site {:?} from the server?",
        dir.display(),
        site
    ))? {
        println!("Cancelled");
        return Ok(());
    }

    let archive = ctx.client().export(&site).await?;
    let archive_bytes = archive.len() as u64;
    let stats = replace_local_tree(&dir, archive).await?;

    let current = tokio::task::spawn_blocking({
        let dir = dir.clone();
        move || walker::fingerprint(&dir)
    })
    .await??;
    SnapshotStore::new(ctx.paths.tracking_dir()).save(&site, &current)?;

    println!(
        "✓ pulled {} into {}: {} ({})",
        site,
        dir.display(),
        plural(stats, "file"),
        format_bytes(archive_bytes)
    );
    Ok(())
}

/// Swap the visible content of `dir` for the archive, keeping hidden
/// top-level entries such as `.git`.
async fn replace_local_tree(dir: &Path, archive: Vec<u8>) -> anyhow::Result<usize> {
    let dir = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        std::fs::create_dir_all(&dir)?;
        let hidden: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(paths::HIDDEN_MARKER))
            .collect();
        let keep: Vec<&str> = hidden.iter().map(String::as_str).collect();
        let stats = apply_full(&dir, archive.as_slice(), &keep)?;
        Ok(stats.files_written)
    })
    .await??;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::archive::{pack_to_vec, PackSelection};
    use std::fs;
    use tempfile::TempDir;

    fn config_with(sites: &[(&str, &Path)]) -> ClientConfig {
        let mut config = ClientConfig::default();
        for (name, dir) in sites {
            config.site_paths.insert(name.to_string(), dir.to_path_buf());
        }
        config
    }

    #[test]
    fn test_resolve_explicit_name_and_dir() {
        let config = ClientConfig::default();
        let (site, dir) = resolve_target(&config, Some("blog"), Some(Path::new("./dist")), Path::new("/tmp")).unwrap();
        assert_eq!(site, "blog");
        assert_eq!(dir, PathBuf::from("./dist"));
    }

    #[test]
    fn test_resolve_configured_dir_and_missing_dir() {
        let config = config_with(&[("blog", Path::new("/work/blog/dist"))]);
        let (_, dir) = resolve_target(&config, Some("blog"), None, Path::new("/tmp")).unwrap();
        assert_eq!(dir, PathBuf::from("/work/blog/dist"));
        assert!(resolve_target(&config, Some("docs"), None, Path::new("/tmp")).is_err());
    }

    #[test]
    fn test_resolve_from_current_directory() {
        let config = config_with(&[
            ("blog", Path::new("/work/blog/dist")),
            ("docs", Path::new("/work/docs/dist")),
        ]);
        let (site, _) = resolve_target(&config, None, None, Path::new("/work/blog/dist/assets")).unwrap();
        assert_eq!(site, "blog");

        assert!(resolve_target(&config, None, None, Path::new("/work")).is_err());
        assert!(resolve_target(&config, None, None, Path::new("/elsewhere")).is_err());
    }

    #[tokio::test]
    async fn test_replace_local_tree_keeps_hidden_entries() -> anyhow::Result<()> {
        let remote = TempDir::new()?;
        fs::create_dir_all(remote.path().join("css"))?;
        fs::write(remote.path().join("index.html"), "remote")?;
        fs::write(remote.path().join("css/site.css"), "body{}")?;
        let archive = pack_to_vec(remote.path(), &PackSelection::All)?;

        let local = TempDir::new()?;
        fs::create_dir_all(local.path().join(".git"))?;
        fs::write(local.path().join(".git/HEAD"), "ref")?;
        fs::write(local.path().join("stale.html"), "old")?;

        let files = replace_local_tree(local.path(), archive).await?;
        assert_eq!(files, 2);
        assert_eq!(fs::read_to_string(local.path().join("index.html"))?, "remote");
        assert!(local.path().join(".git/HEAD").is_file());
        assert!(!local.path().join("stale.html").exists());
        Ok(())
    }
}
