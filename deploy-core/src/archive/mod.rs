//! Tar+gzip packaging of site trees.
//!
//! Archives carry slash-separated relative entry names. Directory entries are
//! written before the files inside them so empty directories survive a round
//! trip. Unpacking validates every entry name against the destination root
//! before anything is written for it.

pub mod pack;
pub mod unpack;

pub use pack::{pack, pack_to_vec, PackSelection};
pub use unpack::{unpack, unpack_bytes};

/// Counters reported by pack and unpack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub dirs: usize,
    /// Payload bytes (uncompressed)
    pub bytes: u64,
    /// Entries ignored (links, hidden names)
    pub skipped: usize,
}
