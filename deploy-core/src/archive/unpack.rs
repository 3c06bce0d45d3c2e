//! Archive unpackager.
//!
//! Entry names are untrusted. Each one is normalized with
//! [`paths::normalize_relative`] and the first name that would resolve
//! outside the destination aborts the whole unpack.

use super::ArchiveStats;
use crate::fs::paths;
use crate::utils::errors::{DeployError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tar::{Archive, EntryType};

fn archive_err(err: io::Error) -> DeployError {
    DeployError::Archive(err.to_string())
}

/// Extract a tar+gzip stream into `dest`.
///
/// Symlink and hardlink entries are ignored, as are entries with a hidden
/// segment (an archive must not write into version metadata). Callers that
/// need all-or-nothing semantics unpack into a staging directory.
///
/// # Errors
/// `PathEscape` for absolute or `..` entry names, `Archive` for a corrupt
/// stream, `Io` when writing fails.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> Result<ArchiveStats> {
    fs::create_dir_all(dest)?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut stats = ArchiveStats::default();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;

        let name = {
            let raw = entry.path_bytes();
            std::str::from_utf8(&raw)
                .map_err(|_| DeployError::Archive("entry name is not valid UTF-8".to_string()))?
                .to_string()
        };
        let relative = paths::normalize_relative(&name)?;

        let entry_type = entry.header().entry_type();
        if matches!(entry_type, EntryType::Symlink | EntryType::Link) {
            tracing::debug!(entry = %name, "Ignoring link entry");
            stats.skipped += 1;
            continue;
        }
        if paths::has_hidden_segment(&name) {
            tracing::debug!(entry = %name, "Ignoring hidden entry");
            stats.skipped += 1;
            continue;
        }

        let target = dest.join(&relative);
        match entry_type {
            EntryType::Directory => {
                if relative.as_os_str().is_empty() {
                    continue;
                }
                fs::create_dir_all(&target)?;
                stats.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if relative.as_os_str().is_empty() {
                    return Err(DeployError::Archive(format!("file entry without a name: {:?}", name)));
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&target)?;
                stats.bytes += io::copy(&mut entry, &mut file).map_err(archive_err)?;
                stats.files += 1;

                if let Ok(mode) = entry.header().mode() {
                    set_mode(&target, mode)?;
                }
            }
            other => {
                tracing::debug!(entry = %name, kind = ?other, "Ignoring unsupported entry type");
                stats.skipped += 1;
            }
        }
    }

    tracing::debug!(
        dest = %dest.display(),
        files = stats.files,
        dirs = stats.dirs,
        skipped = stats.skipped,
        "Unpacked archive"
    );
    Ok(stats)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Extract an in-memory archive.
pub fn unpack_bytes(data: &[u8], dest: &Path) -> Result<ArchiveStats> {
    unpack(data, dest)
}

#[cfg(test)]
pub(crate) mod test_support {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, EntryType, Header};

    /// Build an archive whose entry names are written verbatim, bypassing the
    /// checks `Header::set_path` performs.
    pub fn raw_archive(entries: &[(&str, EntryType, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, kind, data) in entries {
            let mut header = Header::new_gnu();
            {
                let gnu = header.as_gnu_mut().unwrap();
                gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            }
            header.set_entry_type(*kind);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            if *kind == EntryType::Symlink {
                header.set_link_name("target.txt").unwrap();
            }
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}
