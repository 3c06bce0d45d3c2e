//! Change tracking: snapshots, deltas, persisted tracking state and the
//! server-side apply step.

pub mod apply;
pub mod delta;
pub mod snapshot;
pub mod tracking;

pub use apply::{apply_full, apply_incremental, apply_single_file, ApplyStats};
pub use delta::{diff, DeltaSet};
pub use snapshot::{FileRecord, Snapshot};
pub use tracking::SnapshotStore;
