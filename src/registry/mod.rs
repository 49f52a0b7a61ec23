//! Nexus 3 search API client.
//!
//! [`RegistryClient::search`] hides pagination and returns every matching
//! component; [`HttpTransport`] carries the connection settings (auth,
//! proxy, CA trust, timeout) for both search and asset download.

pub mod client;
pub mod error;
pub mod query;
pub mod transport;
pub mod types;

pub use client::RegistryClient;
pub use error::RegistryError;
pub use query::{ArtifactQuery, Credentials, ProxyConfig, TlsConfig};
pub use transport::{HttpTransport, RegistryTransport, TransportResponse};
pub use types::{ArtifactRecord, AssetDescriptor, ResolvedAsset, SearchPage};
