//! Filesystem helpers: tree walking, content hashing and path rules.

pub mod hash;
pub mod metadata;
pub mod paths;
pub mod walker;

pub use walker::fingerprint;
