//! Utility modules shared by the deploy crates.

pub mod errors;
pub mod logger;

pub use errors::{DeployError, Result};
