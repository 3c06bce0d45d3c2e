//! Server-side application of uploaded archives to a live site tree.
//!
//! Every apply extracts into a hidden staging directory next to the site
//! first. Only once the whole archive has been validated and extracted is
//! the live tree touched, so a rejected upload leaves it exactly as it was.

use crate::archive::unpack;
use crate::fs::paths;
use crate::utils::errors::{DeployError, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const STAGING_PREFIX: &str = ".staging-";

/// Outcome of an apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub files_written: usize,
    pub files_deleted: usize,
    pub bytes: u64,
}

/// Replace the whole content of `site_dir` with the archive.
///
/// Top-level entries named in `keep` (the history directory) survive.
pub fn apply_full<R: Read>(site_dir: &Path, archive: R, keep: &[&str]) -> Result<ApplyStats> {
    let staging = staging_dir(site_dir)?;
    let unpacked = unpack(archive, staging.path())?;

    clear_site(site_dir, keep)?;
    merge_tree(staging.path(), site_dir)?;

    tracing::info!(
        site_dir = %site_dir.display(),
        files = unpacked.files,
        bytes = unpacked.bytes,
        "Applied full deploy"
    );
    Ok(ApplyStats {
        files_written: unpacked.files,
        files_deleted: 0,
        bytes: unpacked.bytes,
    })
}

/// Overlay the archive onto `site_dir` and remove the `deleted` paths.
///
/// Deleted paths that are already gone are not an error; directories left
/// empty by a deletion are pruned.
pub fn apply_incremental<R: Read>(site_dir: &Path, archive: R, deleted: &[String]) -> Result<ApplyStats> {
    let targets = deleted
        .iter()
        .map(|raw| deletion_target(site_dir, raw))
        .collect::<Result<Vec<_>>>()?;

    let staging = staging_dir(site_dir)?;
    let unpacked = unpack(archive, staging.path())?;

    let mut files_deleted = 0;
    for target in &targets {
        match fs::remove_file(target) {
            Ok(()) => {
                files_deleted += 1;
                prune_empty_parents(site_dir, target);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %target.display(), "Deleted path already absent");
            }
            Err(e) => return Err(e.into()),
        }
    }

    merge_tree(staging.path(), site_dir)?;

    tracing::info!(
        site_dir = %site_dir.display(),
        written = unpacked.files,
        deleted = files_deleted,
        "Applied incremental deploy"
    );
    Ok(ApplyStats {
        files_written: unpacked.files,
        files_deleted,
        bytes: unpacked.bytes,
    })
}

/// Replace the content of `site_dir` with a single file.
pub fn apply_single_file(site_dir: &Path, file_name: &str, data: &[u8], keep: &[&str]) -> Result<ApplyStats> {
    let relative = paths::normalize_relative(file_name)?;
    if relative.as_os_str().is_empty() || paths::has_hidden_segment(file_name) {
        return Err(DeployError::InvalidInput(format!("invalid file name: {:?}", file_name)));
    }

    let staging = staging_dir(site_dir)?;
    let staged = staging.path().join(&relative);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&staged, data)?;

    clear_site(site_dir, keep)?;
    merge_tree(staging.path(), site_dir)?;

    tracing::info!(site_dir = %site_dir.display(), file = %file_name, "Applied single-file deploy");
    Ok(ApplyStats {
        files_written: 1,
        files_deleted: 0,
        bytes: data.len() as u64,
    })
}

/// Remove everything under `site_dir` except the top-level names in `keep`.
pub fn clear_site(site_dir: &Path, keep: &[&str]) -> Result<()> {
    fs::create_dir_all(site_dir)?;
    for entry in fs::read_dir(site_dir)? {
        let entry = entry?;
        if keep.iter().any(|k| entry.file_name() == *k) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Resolve a deleted path. Only files (or paths already gone) can be
/// deleted, so every check happens before the live tree is touched.
fn deletion_target(site_dir: &Path, raw: &str) -> Result<PathBuf> {
    let relative = paths::normalize_relative(raw)?;
    if relative.as_os_str().is_empty() {
        return Err(DeployError::InvalidInput("cannot delete the site root".to_string()));
    }
    if paths::has_hidden_segment(raw) {
        return Err(DeployError::InvalidInput(format!("cannot delete hidden path: {}", raw)));
    }
    let target = site_dir.join(relative);
    match fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => Err(DeployError::InvalidInput(format!("cannot delete directory: {}", raw))),
        Ok(_) => Ok(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(target),
        Err(e) => Err(e.into()),
    }
}

fn staging_dir(site_dir: &Path) -> Result<tempfile::TempDir> {
    let parent = site_dir
        .parent()
        .ok_or_else(|| DeployError::InvalidInput(format!("site directory has no parent: {}", site_dir.display())))?;
    fs::create_dir_all(parent)?;
    fs::create_dir_all(site_dir)?;
    Ok(tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(parent)?)
}

/// Move every entry of `staging` into `dest`, replacing what is there.
fn merge_tree(staging: &Path, dest: &Path) -> Result<()> {
    // Sorted walks read each directory fully before descending, so renaming
    // entries out of it mid-walk is safe.
    for entry in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|_| DeployError::PathEscape(entry.path().display().to_string()))?;
        let target = dest.join(relative);
        let existing = fs::symlink_metadata(&target).ok();

        if entry.file_type().is_dir() {
            if let Some(meta) = existing {
                if meta.is_dir() {
                    continue;
                }
                fs::remove_file(&target)?;
            }
            fs::create_dir_all(&target)?;
        } else {
            if existing.map(|m| m.is_dir()).unwrap_or(false) {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn prune_empty_parents(site_dir: &Path, removed: &Path) {
    let mut current = removed.parent();
    while let Some(dir) = current {
        if dir == site_dir || !dir.starts_with(site_dir) {
            break;
        }
        // remove_dir fails on non-empty directories, which ends the walk.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::pack::{pack_to_vec, PackSelection};
    use crate::archive::unpack::test_support::raw_archive;
    use crate::fs::walker::fingerprint;
    use tar::EntryType;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn tree(root: &Path) -> Vec<String> {
        fingerprint(root).unwrap().paths().into_iter().map(str::to_string).collect()
    }

    #[test]
    fn test_full_apply_replaces_content_and_keeps_history() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "old.html", b"old");
        write(&site, ".versions/HEAD", b"abc");

        let source = TempDir::new()?;
        write(source.path(), "index.html", b"new");
        write(source.path(), "css/app.css", b"body{}");
        let archive = pack_to_vec(source.path(), &PackSelection::All)?;

        let stats = apply_full(&site, archive.as_slice(), &[".versions"])?;
        assert_eq!(stats.files_written, 2);
        assert_eq!(tree(&site), vec!["css/app.css", "index.html"]);
        assert_eq!(fs::read(site.join(".versions/HEAD"))?, b"abc");
        Ok(())
    }

    #[test]
    fn test_incremental_apply_overlays_and_deletes() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "a.txt", b"hi");
        write(&site, "b/c.txt", b"yo");

        let source = TempDir::new()?;
        write(source.path(), "a.txt", b"hello");
        write(source.path(), "d.txt", b"new");
        let archive = pack_to_vec(
            source.path(),
            &PackSelection::Files(vec!["a.txt".into(), "d.txt".into()]),
        )?;

        let stats = apply_incremental(&site, archive.as_slice(), &["b/c.txt".to_string()])?;
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(tree(&site), vec!["a.txt", "d.txt"]);
        assert_eq!(fs::read(site.join("a.txt"))?, b"hello");
        assert!(!site.join("b").exists());
        Ok(())
    }

    #[test]
    fn test_rejected_archive_leaves_live_tree_untouched() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "index.html", b"live");

        let archive = raw_archive(&[
            ("index.html", EntryType::Regular, b"replaced"),
            ("../evil.txt", EntryType::Regular, b"pwned"),
        ]);

        let result = apply_full(&site, archive.as_slice(), &[]);
        assert!(matches!(result, Err(DeployError::PathEscape(_))));
        assert_eq!(fs::read(site.join("index.html"))?, b"live");
        assert!(!web.path().join("evil.txt").exists());

        // The staging directory is cleaned up.
        let leftovers: Vec<_> = fs::read_dir(web.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn test_escaping_deletion_rejected_before_any_change() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "a.txt", b"hi");
        write(web.path(), "other/keep.txt", b"keep");

        let archive = pack_to_vec(&site, &PackSelection::Files(vec![]))?;
        let result = apply_incremental(
            &site,
            archive.as_slice(),
            &["a.txt".to_string(), "../other/keep.txt".to_string()],
        );
        assert!(matches!(result, Err(DeployError::PathEscape(_))));
        assert!(site.join("a.txt").exists());
        assert!(web.path().join("other/keep.txt").exists());
        Ok(())
    }

    #[test]
    fn test_directory_deletion_rejected_before_any_change() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "a.txt", b"hi");
        write(&site, "docs/inner.txt", b"inner");

        let source = TempDir::new()?;
        write(source.path(), "a.txt", b"changed");
        let archive = pack_to_vec(source.path(), &PackSelection::Files(vec!["a.txt".into()]))?;

        let result = apply_incremental(
            &site,
            archive.as_slice(),
            &["docs/inner.txt".to_string(), "docs".to_string()],
        );
        assert!(matches!(result, Err(DeployError::InvalidInput(_))));
        assert_eq!(fs::read(site.join("a.txt"))?, b"hi");
        assert_eq!(fs::read(site.join("docs/inner.txt"))?, b"inner");
        Ok(())
    }

    #[test]
    fn test_missing_deleted_path_is_ignored() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "a.txt", b"hi");
        let archive = pack_to_vec(&site, &PackSelection::Files(vec![]))?;

        let stats = apply_incremental(&site, archive.as_slice(), &["gone.txt".to_string()])?;
        assert_eq!(stats.files_deleted, 0);
        assert_eq!(tree(&site), vec!["a.txt"]);
        Ok(())
    }

    #[test]
    fn test_single_file_replaces_site() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "old/page.html", b"old");

        apply_single_file(&site, "index.html", b"<h1>one</h1>", &[".git"])?;
        assert_eq!(tree(&site), vec!["index.html"]);
        assert!(apply_single_file(&site, "../x.html", b"x", &[]).is_err());
        assert!(apply_single_file(&site, ".env", b"x", &[]).is_err());
        Ok(())
    }

    #[test]
    fn test_file_replaces_directory_of_same_name() -> Result<()> {
        let web = TempDir::new()?;
        let site = web.path().join("blog");
        write(&site, "docs/inner.txt", b"inner");

        let source = TempDir::new()?;
        write(source.path(), "docs", b"now a file");
        let archive = pack_to_vec(source.path(), &PackSelection::Files(vec!["docs".into()]))?;

        apply_incremental(&site, archive.as_slice(), &["docs/inner.txt".to_string()])?;
        assert_eq!(fs::read(site.join("docs"))?, b"now a file");
        Ok(())
    }
}
