use thiserror::Error;

/// Failures while streaming an asset into its temp file.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        url: String,
        bytes_written: u64,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}
