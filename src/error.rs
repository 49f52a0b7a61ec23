use std::path::PathBuf;

use thiserror::Error;

use crate::install::error::DownloadError;
use crate::registry::RegistryError;

/// Errors that end a reconciliation.
///
/// Metadata persistence failures are deliberately absent: they degrade later
/// runs but never fail the current one (see [`crate::metadata::MetadataError`]).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Could not fetch artifacts: {0}")]
    Registry(RegistryError),

    #[error("No remote artifacts found at {url}")]
    NoArtifactsFound { url: String },

    #[error("Could not find '{repository}/{artifact}' version '{version}' on '{server}'")]
    ArtifactNotFound {
        repository: String,
        artifact: String,
        version: String,
        server: String,
    },

    #[error("Target directory '{}' does not exist", .0.display())]
    MissingParentDirectory(PathBuf),

    #[error("Target path '{}' does not name a file", .0.display())]
    InvalidTarget(PathBuf),

    #[error("Refusing to remove directory at {}", .0.display())]
    RefusingToRemoveDirectory(PathBuf),

    #[error("Error when downloading '{url}' => '{source}'")]
    Download { url: String, source: DownloadError },

    #[error("Checksum did not match for '{}': {algorithm} is '{actual}', expected '{expected}'", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("No checksums could be computed for '{}'", .0.display())]
    NoChecksumComputable(PathBuf),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<RegistryError> for SyncError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NoArtifactsFound { url } => SyncError::NoArtifactsFound { url },
            other => SyncError::Registry(other),
        }
    }
}
