use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use nexus_artifact::registry::{ArtifactQuery, Credentials, ProxyConfig, TlsConfig};
use nexus_artifact::types::{LogLevel, MetadataBackend, Protocol};
use nexus_artifact::{Ensure, SyncOptions};

/// Validated settings for one reconciliation.
pub struct Config {
    pub path: PathBuf,
    pub server: String,
    pub repository: String,
    pub artifact: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxyConfig>,
    pub ca_certificate: Option<PathBuf>,

    pub ensure: Ensure,
    pub connection_timeout: Option<Duration>,
    pub page_delay: Duration,

    pub protocol: Protocol,
    pub metadata: MetadataBackend,
    #[allow(dead_code)] // read from cli.log_level directly in main.rs
    pub log_level: LogLevel,

    pub ssl_verify: bool,
    pub verify_download: bool,
    pub dry_run: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("ensure", &self.ensure)
            .field("server", &self.server)
            .field("protocol", &self.protocol)
            .field("repository", &self.repository)
            .field("artifact", &self.artifact)
            .field("credentials", &self.credentials)
            .field("proxy", &self.proxy.as_ref().map(|p| &p.url))
            .field("metadata", &self.metadata)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn absolute(path: &str, what: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_tilde(path);
    if !expanded.is_absolute() {
        bail!("{} must be an absolute path, got '{}'", what, path);
    }
    Ok(expanded)
}

fn required(value: String, flag: &str) -> anyhow::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("--{} must not be empty", flag);
    }
    Ok(trimmed.to_string())
}

/// Parse the inter-page pause. Accepts a single digit with an optional single
/// decimal, e.g. `2` or `0.5`.
pub(crate) fn parse_sleep(s: &str) -> anyhow::Result<Duration> {
    let bytes = s.as_bytes();
    let well_formed = match bytes {
        [d] => d.is_ascii_digit(),
        [d, b'.', f] => d.is_ascii_digit() && f.is_ascii_digit(),
        _ => false,
    };
    if !well_formed {
        bail!("--sleep must look like '2' or '0.5', got '{}'", s);
    }
    let seconds: f64 = s
        .parse()
        .with_context(|| format!("--sleep value '{}' is not a number", s))?;
    Ok(Duration::from_secs_f64(seconds))
}

/// `true`, `false`, or a chain depth. A depth still means "verify"; the
/// depth itself is not enforced.
pub(crate) fn parse_ssl_verify(s: &str) -> anyhow::Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        other => match other.parse::<u32>() {
            Ok(depth) => {
                tracing::debug!("Ignoring certificate chain depth {}", depth);
                Ok(true)
            }
            Err(_) => bail!("--ssl-verify must be true, false or a depth, got '{}'", s),
        },
    }
}

/// Basic auth is only sent when both halves are given.
fn credential_pair(
    user: Option<String>,
    password: Option<String>,
    user_flag: &str,
    password_flag: &str,
) -> Option<Credentials> {
    match (user, password) {
        (Some(user), Some(password)) => Some(Credentials { user, password }),
        (Some(_), None) => {
            tracing::warn!("{} given without {}; not sending credentials", user_flag, password_flag);
            None
        }
        (None, Some(_)) => {
            tracing::warn!("{} given without {}; not sending credentials", password_flag, user_flag);
            None
        }
        (None, None) => None,
    }
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let path = absolute(&cli.path, "path")?;
        if path.file_name().is_none() {
            bail!("path '{}' does not name a file", path.display());
        }

        let credentials = credential_pair(cli.user, cli.password, "--user", "--password");

        let proxy = match cli.proxy {
            Some(url) => Some(ProxyConfig {
                url,
                credentials: credential_pair(
                    cli.proxy_user,
                    cli.proxy_password,
                    "--proxy-user",
                    "--proxy-password",
                ),
            }),
            None if cli.proxy_user.is_some() => bail!("--proxy-user requires --proxy"),
            None => None,
        };

        let ca_certificate = cli
            .ca_certificate
            .as_deref()
            .map(|p| absolute(p, "--ca-certificate"))
            .transpose()?;

        let page_delay = cli
            .sleep
            .as_deref()
            .map(parse_sleep)
            .transpose()?
            .unwrap_or(Duration::ZERO);

        Ok(Self {
            path,
            server: required(cli.server, "server")?,
            repository: required(cli.repository, "repository")?,
            artifact: required(cli.artifact, "artifact")?,
            credentials,
            proxy,
            ca_certificate,
            ensure: cli.ensure,
            connection_timeout: cli.connection_timeout.map(Duration::from_secs),
            page_delay,
            protocol: cli.protocol,
            metadata: cli.metadata,
            log_level: cli.log_level,
            ssl_verify: parse_ssl_verify(&cli.ssl_verify)?,
            verify_download: cli.verify_download,
            dry_run: cli.dry_run,
        })
    }

    pub fn query(&self) -> ArtifactQuery {
        let mut query = ArtifactQuery::new(&self.server, &self.repository, &self.artifact);
        query.protocol = self.protocol;
        query.credentials = self.credentials.clone();
        query.proxy = self.proxy.clone();
        query.tls = TlsConfig {
            ca_certificate: self.ca_certificate.clone(),
            verify: self.ssl_verify,
        };
        query.connection_timeout = self.connection_timeout;
        query.page_delay = self.page_delay;
        query
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            path: self.path.clone(),
            ensure: self.ensure.clone(),
            verify_download: self.verify_download,
        }
    }
}
