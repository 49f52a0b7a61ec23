use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the registry search API.
///
/// None of these are retried; an indeterminate remote state is reported to
/// the caller instead of being guessed at.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid registry URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Failed to configure HTTP client: {0}")]
    Client(String),

    #[error("ca_certificate not found at '{}'", .0.display())]
    MissingCaCertificate(PathBuf),

    #[error("HTTP {status} {reason} from {url}")]
    HttpStatus {
        status: u16,
        reason: String,
        url: String,
    },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Malformed search response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("Registry returned continuation token '{token}' twice in a row")]
    RepeatedToken { token: String },

    #[error("No remote artifacts found at {url}")]
    NoArtifactsFound { url: String },
}

impl RegistryError {
    pub fn transport(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }
}
