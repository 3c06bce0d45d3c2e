//! Archive packager.

use super::ArchiveStats;
use crate::fs::metadata::{self, DEFAULT_DIR_MODE};
use crate::fs::paths;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::{DeployError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};

/// What to put in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackSelection {
    /// Every visible file and directory under the root
    All,
    /// Only these relative paths, plus the directories leading to them
    Files(Vec<String>),
}

/// Write a tar+gzip archive of `root` to `writer`.
///
/// # Errors
/// `NotFound` when a selected file no longer exists, `PathEscape` when a
/// selected path would leave `root`, `Io` for read and write failures.
pub fn pack<W: Write>(root: &Path, selection: &PackSelection, writer: W) -> Result<ArchiveStats> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    let mut stats = ArchiveStats::default();

    match selection {
        PackSelection::All => {
            let options = WalkOptions { include_dirs: true };
            for info in walk_directory(root, &options)? {
                if info.is_dir {
                    let meta = std::fs::metadata(&info.path)?;
                    append_dir(&mut builder, &info.relative_path, metadata::archive_mode(&meta), metadata::modified_secs(&meta))?;
                    stats.dirs += 1;
                } else {
                    stats.bytes += append_file(&mut builder, &info.path, &info.relative_path)?;
                    stats.files += 1;
                }
            }
        }
        PackSelection::Files(selected) => {
            let mut files = BTreeSet::new();
            let mut dirs = BTreeSet::new();
            for raw in selected {
                let relative = paths::normalize_relative(raw)?;
                let name = paths::to_slash_path(&relative)?;
                if name.is_empty() {
                    return Err(DeployError::InvalidInput(format!("not a file path: {:?}", raw)));
                }
                let mut parent = relative.parent();
                while let Some(dir) = parent {
                    if dir.as_os_str().is_empty() {
                        break;
                    }
                    dirs.insert(paths::to_slash_path(dir)?);
                    parent = dir.parent();
                }
                files.insert(name);
            }

            // BTreeSet order puts every parent before its children.
            for dir in &dirs {
                let mtime = std::fs::metadata(root.join(dir))
                    .map(|m| metadata::modified_secs(&m))
                    .unwrap_or_default();
                append_dir(&mut builder, dir, DEFAULT_DIR_MODE, mtime)?;
                stats.dirs += 1;
            }
            for name in &files {
                let source = paths::safe_join(root, name)?;
                stats.bytes += append_file(&mut builder, &source, name)?;
                stats.files += 1;
            }
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    tracing::debug!(
        root = %root.display(),
        files = stats.files,
        dirs = stats.dirs,
        bytes = stats.bytes,
        "Packed archive"
    );
    Ok(stats)
}

/// Pack into memory.
pub fn pack_to_vec(root: &Path, selection: &PackSelection) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    pack(root, selection, &mut buffer)?;
    Ok(buffer)
}

fn append_dir<W: Write>(builder: &mut Builder<W>, name: &str, mode: u32, mtime: u64) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_mtime(mtime);
    builder.append_data(&mut header, format!("{}/", name), io::empty())?;
    Ok(())
}

fn append_file<W: Write>(builder: &mut Builder<W>, source: &Path, name: &str) -> Result<u64> {
    let file = File::open(source).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            DeployError::NotFound(format!("file {}", name))
        } else {
            DeployError::Io(e)
        }
    })?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(DeployError::InvalidInput(format!("not a regular file: {}", name)));
    }

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(meta.len());
    header.set_mode(metadata::archive_mode(&meta));
    header.set_mtime(metadata::modified_secs(&meta));
    builder.append_data(&mut header, name, file)?;
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use tempfile::TempDir;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(archive));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect()
    }

    #[test]
    fn test_pack_all_skips_hidden_and_keeps_empty_dirs() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("css"))?;
        fs::create_dir_all(dir.path().join("empty"))?;
        fs::create_dir_all(dir.path().join(".versions/objects"))?;
        fs::write(dir.path().join("index.html"), b"<h1>home</h1>")?;
        fs::write(dir.path().join("css/app.css"), b"body{}")?;
        fs::write(dir.path().join(".versions/HEAD"), b"abc")?;

        let mut buffer = Vec::new();
        let stats = pack(dir.path(), &PackSelection::All, &mut buffer)?;
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.bytes, 19);

        let names = entry_names(&buffer);
        assert_eq!(names, vec!["css", "css/app.css", "empty", "index.html"]);
        Ok(())
    }

    #[test]
    fn test_pack_files_writes_parent_chain() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("a/b"))?;
        fs::write(dir.path().join("a/b/deep.txt"), b"deep")?;
        fs::write(dir.path().join("top.txt"), b"top")?;
        fs::write(dir.path().join("unselected.txt"), b"no")?;

        let selection = PackSelection::Files(vec!["a/b/deep.txt".into(), "top.txt".into()]);
        let buffer = pack_to_vec(dir.path(), &selection)?;
        assert_eq!(entry_names(&buffer), vec!["a", "a/b", "a/b/deep.txt", "top.txt"]);
        Ok(())
    }

    #[test]
    fn test_pack_missing_file_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let selection = PackSelection::Files(vec!["gone.txt".into()]);
        assert!(matches!(pack_to_vec(dir.path(), &selection), Err(DeployError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_pack_rejects_escaping_selection() -> Result<()> {
        let dir = TempDir::new()?;
        let selection = PackSelection::Files(vec!["../outside.txt".into()]);
        assert!(matches!(pack_to_vec(dir.path(), &selection), Err(DeployError::PathEscape(_))));
        Ok(())
    }
}
