//! File metadata helpers for snapshots and archive headers.

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::time::SystemTime;

/// Default mode for files whose platform carries no permission bits.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default mode for directories whose platform carries no permission bits.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Last modification time as UTC. Unreadable times map to the Unix epoch.
pub fn modified_utc(metadata: &Metadata) -> DateTime<Utc> {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    DateTime::<Utc>::from(modified)
}

/// Modified time in whole seconds since the Unix epoch.
pub fn modified_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Permission bits to record in an archive header.
#[cfg(unix)]
pub fn archive_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
pub fn archive_mode(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        DEFAULT_DIR_MODE
    } else {
        DEFAULT_FILE_MODE
    }
}
