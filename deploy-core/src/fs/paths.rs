//! Relative-path rules shared by the fingerprinter, archives and the server.
//!
//! Every path that crosses a boundary (tracking files, archive entries,
//! deletion lists, HTTP requests) is a `/`-separated path relative to some
//! root. These helpers convert to and from that form and make sure a path
//! can never resolve outside its root.

use crate::utils::errors::{DeployError, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Entries whose name starts with this marker are never tracked, packaged
/// or served.
pub const HIDDEN_MARKER: char = '.';

/// True when a file or directory name follows the hidden-entry convention.
pub fn is_hidden(name: &OsStr) -> bool {
    name.to_str()
        .map(|n| n.starts_with(HIDDEN_MARKER))
        .unwrap_or_else(|| name.to_string_lossy().starts_with(HIDDEN_MARKER))
}

/// Convert a path relative to a root into the slash-separated wire form.
///
/// Fails on `..`, absolute components and names that are not valid UTF-8.
pub fn to_slash_path(relative: &Path) -> Result<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    DeployError::InvalidInput(format!(
                        "path is not valid UTF-8: {}",
                        relative.display()
                    ))
                })?;
                segments.push(part);
            }
            Component::CurDir => {}
            _ => return Err(DeployError::PathEscape(relative.display().to_string())),
        }
    }
    Ok(segments.join("/"))
}

/// Parse a wire path into a relative `PathBuf` that stays under its root.
///
/// Empty and `.` segments are dropped, so `./a//b` becomes `a/b`. An empty
/// result means the root itself.
pub fn normalize_relative(raw: &str) -> Result<PathBuf> {
    if raw.contains('\0') {
        return Err(DeployError::InvalidInput(format!("path contains NUL: {:?}", raw)));
    }
    if raw.starts_with('/') {
        return Err(DeployError::PathEscape(raw.to_string()));
    }

    let mut normalized = PathBuf::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(DeployError::PathEscape(raw.to_string())),
            _ => normalized.push(segment),
        }
    }

    // Platform-specific parsing (drive prefixes, backslashes) must still
    // yield only plain names.
    if normalized
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(DeployError::PathEscape(raw.to_string()));
    }

    Ok(normalized)
}

/// Join a wire path onto `root`, rejecting anything that would escape it.
pub fn safe_join(root: &Path, raw: &str) -> Result<PathBuf> {
    let relative = normalize_relative(raw)?;
    Ok(root.join(relative))
}

/// True when any segment of a wire path is hidden.
pub fn has_hidden_segment(raw: &str) -> bool {
    raw.split('/').any(|s| s.starts_with(HIDDEN_MARKER) && s != ".")
}

/// Reduce a requested site name to the safe alphabet `[a-z0-9_-]`.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_site_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// True when `name` is already in the sanitized site-name form.
pub fn is_valid_site_name(name: &str) -> bool {
    sanitize_site_name(name).as_deref() == Some(name)
}
