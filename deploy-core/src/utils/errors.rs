//! Error types for deployment, tracking and version-history operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path escapes destination root: {0}")]
    PathEscape(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Version control command timed out after {0}s")]
    Timeout(u64),

    #[error("No changes to commit")]
    NoChanges,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<walkdir::Error> for DeployError {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match err.into_io_error() {
            Some(io) => DeployError::Io(std::io::Error::new(
                io.kind(),
                format!("{}: {}", path, io),
            )),
            None => DeployError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("filesystem loop detected at {}", path),
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
