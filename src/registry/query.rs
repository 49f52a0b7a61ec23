use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::error::RegistryError;
use crate::types::Protocol;

const SEARCH_PATH: &str = "/service/rest/v1/search";

/// User/password pair for HTTP basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// A PEM file, or a directory of `.pem`/`.crt` files.
    pub ca_certificate: Option<PathBuf>,
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_certificate: None,
            verify: true,
        }
    }
}

/// Everything needed to locate an artifact on a Nexus server.
///
/// Built once per reconciliation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactQuery {
    pub server: String,
    pub protocol: Protocol,
    pub repository: String,
    pub artifact: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxyConfig>,
    pub tls: TlsConfig,
    pub connection_timeout: Option<Duration>,
    /// Pause between search pages, to go easy on the server.
    pub page_delay: Duration,
}

impl ArtifactQuery {
    pub fn new(
        server: impl Into<String>,
        repository: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            protocol: Protocol::default(),
            repository: repository.into(),
            artifact: artifact.into(),
            credentials: None,
            proxy: None,
            tls: TlsConfig::default(),
            connection_timeout: None,
            page_delay: Duration::ZERO,
        }
    }

    /// First-page search URL; follow-up pages add a `continuationToken`.
    pub fn search_url(&self) -> Result<Url, RegistryError> {
        let raw = format!(
            "{}://{}{}",
            self.protocol.as_str(),
            self.server.trim_end_matches('/'),
            SEARCH_PATH
        );
        let mut url = Url::parse(&raw).map_err(|source| RegistryError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("repository", &self.repository)
            .append_pair("name", &self.artifact);
        Ok(url)
    }
}
