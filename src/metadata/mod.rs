//! Install-time facts kept next to the target file.
//!
//! After every install the engine records the file's modification time, the
//! installed version and the registry's checksums. On the next run those
//! facts let it answer "is this file current?" without touching the network
//! or hashing the file, as long as the recorded mtime still matches.
//!
//! Facts are stored as flat string key/value pairs. Every key starts with a
//! privilege-scoped prefix (`trusted` for root, `user` otherwise) so that
//! reads always use the same namespace the writer used.

pub mod error;
pub mod sidecar;
#[cfg(unix)]
pub mod xattr_store;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use crate::checksum::Checksums;
use crate::types::MetadataBackend;

pub use error::MetadataError;
pub use sidecar::SidecarStore;
#[cfg(unix)]
pub use xattr_store::XattrStore;

const MTIME_KEY: &str = "nexus_artifact.mtime";
const VERSION_KEY: &str = "nexus_artifact.version";
const CHECKSUM_KEY: &str = "cksum";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalMetadata {
    /// Modification time of the file right after install, in whole seconds.
    pub mtime: i64,
    pub version: Option<String>,
    pub checksums: Checksums,
}

/// Key naming for the flat attribute namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataKeys {
    prefix: String,
}

impl MetadataKeys {
    /// Keys for the privilege level this process runs with.
    pub fn for_current_user() -> Self {
        Self::with_prefix(privilege_prefix())
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn mtime(&self) -> String {
        format!("{}.{}", self.prefix, MTIME_KEY)
    }

    pub fn version(&self) -> String {
        format!("{}.{}", self.prefix, VERSION_KEY)
    }

    pub fn checksum(&self, algorithm: &str) -> String {
        format!("{}{}", self.checksum_prefix(), algorithm)
    }

    fn checksum_prefix(&self) -> String {
        format!("{}.{}.", self.prefix, CHECKSUM_KEY)
    }

    /// Whether `key` is one of ours. Foreign attributes are left alone.
    pub fn owns(&self, key: &str) -> bool {
        key == self.mtime() || key == self.version() || key.starts_with(&self.checksum_prefix())
    }

    pub fn encode(&self, metadata: &LocalMetadata) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert(self.mtime(), metadata.mtime.to_string());
        if let Some(version) = &metadata.version {
            attrs.insert(self.version(), version.clone());
        }
        for (algorithm, digest) in &metadata.checksums {
            attrs.insert(self.checksum(algorithm), digest.clone());
        }
        attrs
    }

    /// Rebuild metadata from attributes. Returns `None` when none of our
    /// keys are present.
    ///
    /// A record without a readable mtime decodes with mtime 0, which never
    /// matches a real file and so is never trusted.
    pub fn decode(&self, attrs: &BTreeMap<String, String>) -> Option<LocalMetadata> {
        let checksum_prefix = self.checksum_prefix();
        let mut found = false;
        let mut metadata = LocalMetadata::default();

        for (key, value) in attrs {
            if *key == self.mtime() {
                found = true;
                metadata.mtime = value.trim().parse().unwrap_or_else(|_| {
                    tracing::debug!("Unparseable mtime '{}' in metadata", value);
                    0
                });
            } else if *key == self.version() {
                found = true;
                if !value.is_empty() {
                    metadata.version = Some(value.clone());
                }
            } else if let Some(algorithm) = key.strip_prefix(&checksum_prefix) {
                found = true;
                if !algorithm.is_empty() && !value.is_empty() {
                    metadata
                        .checksums
                        .insert(algorithm.to_string(), value.clone());
                }
            }
        }

        found.then_some(metadata)
    }
}

/// `trusted` when running as root, `user` otherwise; the same rule for
/// reading and writing.
pub fn privilege_prefix() -> &'static str {
    if running_as_root() {
        "trusted"
    } else {
        "user"
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Modification time of a file in whole seconds since the epoch.
pub fn modified_secs(metadata: &std::fs::Metadata) -> std::io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    })
}

/// Per-file metadata persistence.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Metadata recorded for `path`, or `None` when there is none.
    async fn get(&self, path: &Path) -> Result<Option<LocalMetadata>, MetadataError>;

    /// Replace whatever is recorded for `path`.
    async fn set(&self, path: &Path, metadata: &LocalMetadata) -> Result<(), MetadataError>;
}

/// Store used when metadata is disabled. Every run hashes the file.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl MetadataStore for NullStore {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _path: &Path) -> Result<Option<LocalMetadata>, MetadataError> {
        Ok(None)
    }

    async fn set(&self, path: &Path, _metadata: &LocalMetadata) -> Result<(), MetadataError> {
        tracing::debug!("Metadata disabled, not recording facts for {}", path.display());
        Ok(())
    }
}

/// Tries `primary` first and falls back to `fallback` when it fails, e.g.
/// extended attributes on a file system that does not support them.
pub struct FallbackStore {
    primary: Arc<dyn MetadataStore>,
    fallback: Arc<dyn MetadataStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn MetadataStore>, fallback: Arc<dyn MetadataStore>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl MetadataStore for FallbackStore {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn get(&self, path: &Path) -> Result<Option<LocalMetadata>, MetadataError> {
        match self.primary.get(path).await {
            Ok(Some(metadata)) => return Ok(Some(metadata)),
            Ok(None) => {}
            Err(e) => tracing::debug!(
                "{} metadata unavailable for {}: {}",
                self.primary.name(),
                path.display(),
                e
            ),
        }
        self.fallback.get(path).await
    }

    async fn set(&self, path: &Path, metadata: &LocalMetadata) -> Result<(), MetadataError> {
        match self.primary.set(path, metadata).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(
                    "{} metadata not writable for {} ({}), using {}",
                    self.primary.name(),
                    path.display(),
                    e,
                    self.fallback.name()
                );
                self.fallback.set(path, metadata).await
            }
        }
    }
}

/// Build the store for the configured backend.
pub fn open_store(backend: MetadataBackend) -> Arc<dyn MetadataStore> {
    let keys = MetadataKeys::for_current_user();
    match backend {
        MetadataBackend::None => Arc::new(NullStore),
        MetadataBackend::Sidecar => Arc::new(SidecarStore::new(keys)),
        MetadataBackend::Xattr => native_store(keys),
        MetadataBackend::Auto => Arc::new(FallbackStore::new(
            native_store(keys.clone()),
            Arc::new(SidecarStore::new(keys)),
        )),
    }
}

#[cfg(unix)]
fn native_store(keys: MetadataKeys) -> Arc<dyn MetadataStore> {
    Arc::new(XattrStore::new(keys))
}

#[cfg(not(unix))]
fn native_store(_keys: MetadataKeys) -> Arc<dyn MetadataStore> {
    struct Unsupported;

    #[async_trait]
    impl MetadataStore for Unsupported {
        fn name(&self) -> &'static str {
            "xattr"
        }

        async fn get(&self, _path: &Path) -> Result<Option<LocalMetadata>, MetadataError> {
            Err(MetadataError::Unsupported)
        }

        async fn set(&self, _path: &Path, _metadata: &LocalMetadata) -> Result<(), MetadataError> {
            Err(MetadataError::Unsupported)
        }
    }

    Arc::new(Unsupported)
}
