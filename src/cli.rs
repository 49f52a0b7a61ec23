use clap::Parser;
use nexus_artifact::types::{LogLevel, MetadataBackend, Protocol};
use nexus_artifact::Ensure;

#[derive(Parser, Debug)]
#[command(
    name = "nexus-artifact-rs",
    version,
    about = "Keep a local file in sync with an artifact in a Nexus repository"
)]
pub struct Cli {
    /// Absolute path of the file to manage
    pub path: String,

    /// Desired state: present, absent, latest, or an exact version
    #[arg(long, default_value = "present")]
    pub ensure: Ensure,

    /// Nexus server host name, optionally with a port
    #[arg(long)]
    pub server: String,

    /// Protocol used to reach the server
    #[arg(long, value_enum, default_value = "https")]
    pub protocol: Protocol,

    /// Repository the artifact is published in
    #[arg(long)]
    pub repository: String,

    /// Artifact name as shown by the Nexus search API
    #[arg(long)]
    pub artifact: String,

    /// User for HTTP basic auth
    #[arg(long)]
    pub user: Option<String>,

    /// Password for HTTP basic auth.
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the NEXUS_PASSWORD environment variable instead.
    #[arg(long, env = "NEXUS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// HTTP proxy URL
    #[arg(long)]
    pub proxy: Option<String>,

    /// User for proxy authentication
    #[arg(long)]
    pub proxy_user: Option<String>,

    /// Password for proxy authentication
    #[arg(long, env = "NEXUS_PROXY_PASSWORD", hide_env_values = true)]
    pub proxy_password: Option<String>,

    /// CA certificate file, or a directory of .pem/.crt files (absolute path)
    #[arg(long)]
    pub ca_certificate: Option<String>,

    /// Verify the server certificate: true, false, or a chain depth
    #[arg(long, default_value = "true")]
    pub ssl_verify: String,

    /// Check the download against the registry's checksums before installing
    #[arg(long)]
    pub verify_download: bool,

    /// Seconds to wait between search pages, e.g. 0.5
    #[arg(long)]
    pub sleep: Option<String>,

    /// Connection timeout in seconds
    #[arg(long)]
    pub connection_timeout: Option<u64>,

    /// Where install metadata is kept
    #[arg(long, value_enum, default_value = "auto")]
    pub metadata: MetadataBackend,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Report what would change without touching the file
    #[arg(long)]
    pub dry_run: bool,
}
