//! Error types for metadata persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or writing install-time metadata.
///
/// None of these fail a reconciliation. A failed read means the next
/// decision falls back to checksums; a failed write is surfaced as a
/// warning because it makes later runs more expensive.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Metadata exists but could not be read.
    #[error("Could not read metadata for '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metadata could not be persisted.
    #[error("Could not write metadata for '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sidecar file exists but is not valid JSON.
    #[error("Malformed metadata file '{}': {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// No metadata mechanism is available on this platform.
    #[error("Extended attributes are not supported on this platform")]
    Unsupported,
}
