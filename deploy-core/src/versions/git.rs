//! Version history backed by the `git` binary.
//!
//! Each site directory is its own repository. Commands run with
//! `kill_on_drop`, so when the caller's timeout fires the child process is
//! killed instead of lingering.

use super::{VersionBackend, VersionRecord};
use crate::utils::errors::{DeployError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

const FIELD_SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%H%x1f%s%x1f%an%x1f%aI";
const COMMITTER_NAME: &str = "deploy-server";
const COMMITTER_EMAIL: &str = "deploy@localhost";

#[derive(Debug, Clone)]
pub struct GitBackend {
    program: String,
}

impl Default for GitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GitBackend {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    async fn run(&self, site_dir: &Path, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .arg("-c")
            .arg(format!("user.name={}", COMMITTER_NAME))
            .arg("-c")
            .arg(format!("user.email={}", COMMITTER_EMAIL))
            .args(args)
            .current_dir(site_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DeployError::VersionControl(format!("failed to run {}: {}", self.program, e)))
    }

    /// Run and require success, returning stdout.
    async fn run_ok(&self, site_dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.run(site_dir, args).await?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn has_head(&self, site_dir: &Path) -> Result<bool> {
        let output = self.run(site_dir, &["rev-parse", "--verify", "-q", "HEAD"]).await?;
        Ok(output.status.success())
    }
}

fn command_error(args: &[&str], output: &Output) -> DeployError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
    DeployError::VersionControl(format!(
        "git {} failed ({}): {}",
        args.first().copied().unwrap_or_default(),
        output.status,
        detail
    ))
}

fn parse_log_line(line: &str) -> Result<VersionRecord> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() != 4 {
        return Err(DeployError::VersionControl(format!("unexpected git log line: {:?}", line)));
    }
    let date = DateTime::parse_from_rfc3339(fields[3])
        .map_err(|e| DeployError::VersionControl(format!("bad commit date {:?}: {}", fields[3], e)))?
        .with_timezone(&Utc);

    Ok(VersionRecord {
        id: fields[0].to_string(),
        message: fields[1].to_string(),
        author: fields[2].to_string(),
        date,
    })
}

#[async_trait]
impl VersionBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn history_dir(&self) -> &'static str {
        ".git"
    }

    async fn init(&self, site_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(site_dir).await?;
        self.run_ok(site_dir, &["init", "-q"]).await?;
        Ok(())
    }

    async fn has_changes(&self, site_dir: &Path) -> Result<bool> {
        let status = self.run_ok(site_dir, &["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    async fn commit(&self, site_dir: &Path, message: &str, author: &str) -> Result<VersionRecord> {
        self.run_ok(site_dir, &["add", "-A"]).await?;

        let author_arg = format!("--author={} <{}@deploy.local>", author, author);
        let output = self
            .run(site_dir, &["commit", "-q", "-m", message, &author_arg])
            .await?;
        if !output.status.success() {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if combined.contains("nothing to commit") || combined.contains("nothing added to commit") {
                return Err(DeployError::NoChanges);
            }
            return Err(command_error(&["commit"], &output));
        }

        let line = self.run_ok(site_dir, &["log", "-1", LOG_FORMAT]).await?;
        parse_log_line(line.trim_end())
    }

    async fn log(&self, site_dir: &Path, limit: usize) -> Result<Vec<VersionRecord>> {
        if !self.has_head(site_dir).await? {
            return Ok(Vec::new());
        }
        let limit_arg = format!("-n{}", limit);
        let output = self.run_ok(site_dir, &["log", &limit_arg, LOG_FORMAT]).await?;
        output
            .lines()
            .filter(|l| !l.is_empty())
            .map(parse_log_line)
            .collect()
    }

    async fn resolve(&self, site_dir: &Path, version: &str) -> Result<Option<String>> {
        let rev = format!("{}^{{commit}}", version);
        let output = self
            .run(site_dir, &["rev-parse", "--verify", "-q", &rev])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    async fn checkout_path(&self, site_dir: &Path, version: &str) -> Result<()> {
        // Drop tracked files first so paths absent from `version` disappear.
        self.run_ok(site_dir, &["rm", "-r", "-q", "--ignore-unmatch", "--", "."])
            .await?;
        let tree = self.run_ok(site_dir, &["ls-tree", "--name-only", version]).await?;
        if tree.trim().is_empty() {
            return Ok(());
        }
        self.run_ok(site_dir, &["checkout", version, "--", "."]).await?;
        Ok(())
    }

    async fn reset_hard(&self, site_dir: &Path, version: &str) -> Result<()> {
        self.run_ok(site_dir, &["reset", "-q", "--hard", version]).await?;
        self.run_ok(site_dir, &["clean", "-f", "-d", "-q"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{RestoreOutcome, VersionStore};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_parse_log_line() {
        let line = "0123abcd\u{1f}Deploy home\u{1f}alice\u{1f}2024-05-01T10:00:00+02:00";
        let record = parse_log_line(line).unwrap();
        assert_eq!(record.id, "0123abcd");
        assert_eq!(record.message, "Deploy home");
        assert_eq!(record.author, "alice");
        assert_eq!(record.date.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert!(parse_log_line("only|pipes").is_err());
    }

    #[tokio::test]
    async fn test_git_commit_log_and_restore() -> Result<()> {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return Ok(());
        }
        let dir = TempDir::new()?;
        let store = VersionStore::new(Arc::new(GitBackend::new()));

        fs::write(dir.path().join("a.txt"), b"one")?;
        let first = store.commit(dir.path(), "first", "alice").await?;
        assert_eq!(first.id.len(), 40);
        assert_eq!(first.author, "alice");

        fs::write(dir.path().join("a.txt"), b"two")?;
        fs::write(dir.path().join("b.txt"), b"extra")?;
        store.commit(dir.path(), "second", "alice").await?;
        assert!(matches!(store.commit(dir.path(), "third", "alice").await, Err(DeployError::NoChanges)));

        let outcome = store.restore(dir.path(), &first.id[..8], None, "bob").await?;
        assert!(matches!(outcome, RestoreOutcome::Restored(_)));
        assert_eq!(fs::read(dir.path().join("a.txt"))?, b"one");
        assert!(!dir.path().join("b.txt").exists());

        let messages: Vec<_> = store.list(dir.path(), None).await?.into_iter().map(|r| r.message).collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], "first");

        let again = store.restore(dir.path(), &first.id, None, "bob").await?;
        assert_eq!(again, RestoreOutcome::Unchanged);
        Ok(())
    }

    #[tokio::test]
    async fn test_git_log_on_empty_repository() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let dir = TempDir::new()?;
        let backend = GitBackend::new();
        backend.init(dir.path()).await?;
        assert!(backend.log(dir.path(), 20).await?.is_empty());
        assert!(backend.resolve(dir.path(), "abcdef1").await?.is_none());
        Ok(())
    }
}
