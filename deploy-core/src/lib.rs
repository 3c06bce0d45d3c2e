//! Deploy Core Library
//!
//! Change tracking, archive packaging and version history shared by the
//! deployment client and server.

pub mod archive;
pub mod executor;
pub mod fs;
pub mod sync;
pub mod utils;
pub mod versions;

// Re-export commonly used types
pub use sync::delta::{diff, DeltaSet};
pub use sync::snapshot::{FileRecord, Snapshot};
pub use utils::errors::DeployError;
pub type Result<T> = std::result::Result<T, DeployError>;
