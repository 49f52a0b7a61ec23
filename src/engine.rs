//! Reconciles one local file against one artifact in the registry.
//!
//! A [`SyncEngine`] is built for a single reconciliation and dropped after
//! it. It owns the per-run [`ArtifactResolver`], so the registry is searched
//! at most once no matter how many times the engine needs the remote side.
//!
//! Drift detection tries the cheapest signal that can give a confident
//! answer, in this order:
//!
//! | tier | signal | network | hashing |
//! |------|--------|---------|---------|
//! | 1 | recorded mtime differs from the file | no | no |
//! | 2, 3 | desired is mere existence / absence | no | no |
//! | 4 | file is missing | no | no |
//! | 5 | cached version | only when it differs | no |
//! | 6 | cached checksums | yes | no |
//! | 7 | full checksum of the file | yes | yes |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checksum::{self, Checksums};
use crate::error::SyncError;
use crate::install::{self, Installer};
use crate::metadata::{self, LocalMetadata, MetadataError, MetadataStore};
use crate::registry::{ArtifactQuery, RegistryClient, RegistryTransport, ResolvedAsset};
use crate::resolver::{ArtifactResolver, Selector};

/// Desired state of the target file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Ensure {
    /// Any version will do; install the latest when missing.
    #[default]
    Present,
    Absent,
    Latest,
    Exact(String),
}

impl Ensure {
    /// Which registry version satisfies this state, if any is needed.
    pub fn selector(&self) -> Option<Selector> {
        match self {
            Ensure::Absent => None,
            Ensure::Present | Ensure::Latest => Some(Selector::Latest),
            Ensure::Exact(v) => Some(Selector::Exact(v.clone())),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid ensure value '{0}': expected present, absent, latest or a version")]
pub struct InvalidEnsure(String);

impl FromStr for Ensure {
    type Err = InvalidEnsure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(InvalidEnsure(s.to_string())),
            "present" => Ok(Ensure::Present),
            "absent" => Ok(Ensure::Absent),
            "latest" => Ok(Ensure::Latest),
            version => Ok(Ensure::Exact(version.to_string())),
        }
    }
}

impl std::fmt::Display for Ensure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ensure::Present => f.write_str("present"),
            Ensure::Absent => f.write_str("absent"),
            Ensure::Latest => f.write_str("latest"),
            Ensure::Exact(v) => f.write_str(v),
        }
    }
}

/// What the engine knows about the target before asking the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    Present,
    Version(String),
    /// The file changed since the last install; recorded facts are stale.
    MtimeChanged,
    UnknownVersion,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Absent => f.write_str("absent"),
            SyncState::Present => f.write_str("present"),
            SyncState::Version(v) => f.write_str(v),
            SyncState::MtimeChanged => f.write_str("mtime changed"),
            SyncState::UnknownVersion => f.write_str("unknown version"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub path: PathBuf,
    pub ensure: Ensure,
    pub verify_download: bool,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    InSync(SyncState),
    Installed {
        version: Option<String>,
        /// Set when the install succeeded but its facts could not be
        /// recorded; the next run will fall back to hashing.
        metadata_warning: Option<String>,
    },
    Removed,
    /// Dry run: the file is out of sync and would have been changed.
    WouldChange { from: SyncState, to: Ensure },
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::InSync(state) => write!(f, "in sync ({})", state),
            SyncOutcome::Installed {
                version,
                metadata_warning,
            } => {
                write!(f, "installed {}", version.as_deref().unwrap_or("(unversioned)"))?;
                if let Some(warning) = metadata_warning {
                    write!(f, " (warning: {})", warning)?;
                }
                Ok(())
            }
            SyncOutcome::Removed => f.write_str("removed"),
            SyncOutcome::WouldChange { from, to } => {
                write!(f, "[DRY RUN] would change {} to {}", from, to)
            }
        }
    }
}

/// The cheapest check able to decide whether the file is in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tier {
    MtimeChanged,
    Existence,
    Absence,
    Missing,
    CachedVersion(String),
    CachedChecksums(Checksums),
    FullChecksum,
}

fn tier_for(
    current: &SyncState,
    desired: &Ensure,
    exists: bool,
    metadata: Option<&LocalMetadata>,
) -> Tier {
    match (current, desired) {
        (SyncState::MtimeChanged, _) => Tier::MtimeChanged,
        (_, Ensure::Present) => Tier::Existence,
        (_, Ensure::Absent) => Tier::Absence,
        _ if !exists => Tier::Missing,
        (SyncState::Version(v), _) => Tier::CachedVersion(v.clone()),
        (SyncState::UnknownVersion, _) => match metadata {
            Some(m) if !m.checksums.is_empty() => Tier::CachedChecksums(m.checksums.clone()),
            _ => Tier::FullChecksum,
        },
        _ => Tier::FullChecksum,
    }
}

pub struct SyncEngine {
    options: SyncOptions,
    resolver: ArtifactResolver,
    installer: Installer,
    store: Arc<dyn MetadataStore>,
    local: Option<Option<LocalMetadata>>,
}

impl SyncEngine {
    pub fn new(
        options: SyncOptions,
        query: ArtifactQuery,
        transport: Arc<dyn RegistryTransport>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        let installer = Installer::new(transport.clone(), options.verify_download);
        let resolver = ArtifactResolver::new(RegistryClient::new(query, transport));
        Self {
            options,
            resolver,
            installer,
            store,
            local: None,
        }
    }

    fn path(&self) -> &Path {
        &self.options.path
    }

    /// Recorded facts for the target, read once per run.
    ///
    /// A store failure counts as "nothing recorded"; drift detection then
    /// falls back to checksums.
    async fn local_metadata(&mut self) -> Option<LocalMetadata> {
        if let Some(local) = &self.local {
            return local.clone();
        }
        let local = match self.store.get(&self.options.path).await {
            Ok(local) => local,
            Err(e) => {
                warn!(
                    "Ignoring {} metadata for {}: {}",
                    self.store.name(),
                    self.options.path.display(),
                    e
                );
                None
            }
        };
        self.local = Some(local.clone());
        local
    }

    async fn actual_mtime(&self) -> Result<Option<i64>, SyncError> {
        match tokio::fs::metadata(self.path()).await {
            Ok(m) => metadata::modified_secs(&m)
                .map(Some)
                .map_err(|e| SyncError::io(self.path(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(self.path(), e)),
        }
    }

    async fn exists(&self) -> Result<bool, SyncError> {
        tokio::fs::try_exists(self.path())
            .await
            .map_err(|e| SyncError::io(self.path(), e))
    }

    /// What the target looks like right now, without touching the network.
    pub async fn current_state(&mut self) -> Result<SyncState, SyncError> {
        let Some(mtime) = self.actual_mtime().await? else {
            return Ok(SyncState::Absent);
        };
        if self.options.ensure == Ensure::Present {
            return Ok(SyncState::Present);
        }

        let state = match self.local_metadata().await {
            Some(local) if local.mtime != mtime => {
                debug!(
                    "{} modified outside of this tool (recorded mtime {}, actual {})",
                    self.path().display(),
                    local.mtime,
                    mtime
                );
                SyncState::MtimeChanged
            }
            Some(LocalMetadata {
                version: Some(version),
                ..
            }) => SyncState::Version(version),
            _ => SyncState::UnknownVersion,
        };
        Ok(state)
    }

    /// Whether `current` satisfies `desired`.
    ///
    /// Registry failures are returned as errors, never guessed as an answer.
    pub async fn is_in_sync(
        &mut self,
        current: &SyncState,
        desired: &Ensure,
    ) -> Result<bool, SyncError> {
        let exists = self.exists().await?;
        let local = self.local_metadata().await;
        let tier = tier_for(current, desired, exists, local.as_ref());
        debug!("Deciding sync of {} via {:?}", self.path().display(), tier);

        match tier {
            Tier::MtimeChanged => Ok(false),
            Tier::Existence => Ok(exists),
            Tier::Absence => Ok(!exists),
            Tier::Missing => Ok(false),
            Tier::CachedVersion(cached) => self.cached_version_in_sync(&cached, desired).await,
            Tier::CachedChecksums(cached) => {
                match self.cached_checksums_in_sync(&cached, desired).await? {
                    Some(answer) => Ok(answer),
                    None => self.full_checksum_in_sync(desired).await,
                }
            }
            Tier::FullChecksum => self.full_checksum_in_sync(desired).await,
        }
    }

    async fn find(&mut self, desired: &Ensure) -> Result<Option<ResolvedAsset>, SyncError> {
        match desired.selector() {
            Some(selector) => self.resolver.find(&selector).await,
            None => Ok(None),
        }
    }

    async fn cached_version_in_sync(
        &mut self,
        cached: &str,
        desired: &Ensure,
    ) -> Result<bool, SyncError> {
        if let Ensure::Exact(wanted) = desired {
            if wanted == cached {
                debug!("Cached version {} matches without a registry lookup", cached);
                return Ok(true);
            }
        }
        let remote = self.find(desired).await?;
        Ok(remote.and_then(|asset| asset.version).as_deref() == Some(cached))
    }

    /// `None` when no algorithm is recorded on both sides.
    async fn cached_checksums_in_sync(
        &mut self,
        cached: &Checksums,
        desired: &Ensure,
    ) -> Result<Option<bool>, SyncError> {
        let Some(remote) = self.find(desired).await? else {
            return Ok(Some(false));
        };
        for (algorithm, digest) in cached {
            if let Some(declared) = remote.checksums.get(algorithm) {
                let same = checksum::digests_equal(digest, declared);
                debug!("Cached {} digest matches registry: {}", algorithm, same);
                return Ok(Some(same));
            }
        }
        Ok(None)
    }

    async fn full_checksum_in_sync(&mut self, desired: &Ensure) -> Result<bool, SyncError> {
        let Some(remote) = self.find(desired).await? else {
            return Ok(false);
        };
        Ok(checksum::find_match(&self.options.path, &remote.checksums)
            .await
            .is_some())
    }

    /// Bring the target to `desired`.
    pub async fn apply(&mut self, desired: &Ensure) -> Result<SyncOutcome, SyncError> {
        let Some(selector) = desired.selector() else {
            let removed = self.installer.remove(&self.options.path).await?;
            self.local = None;
            return Ok(if removed {
                SyncOutcome::Removed
            } else {
                SyncOutcome::InSync(SyncState::Absent)
            });
        };

        install::ensure_parent_dir(&self.options.path)?;
        let asset = self.resolver.resolve(&selector).await?;
        self.installer.install(&asset, &self.options.path).await?;

        let metadata_warning = self.record(&asset).await.err().map(|e| {
            warn!(
                "Installed {} but could not record its metadata: {}",
                self.options.path.display(),
                e
            );
            e.to_string()
        });
        self.local = None;

        Ok(SyncOutcome::Installed {
            version: asset.version,
            metadata_warning,
        })
    }

    async fn record(&self, asset: &ResolvedAsset) -> Result<(), MetadataError> {
        let unreadable = |source| MetadataError::Read {
            path: self.path().to_path_buf(),
            source,
        };
        let stat = tokio::fs::metadata(self.path()).await.map_err(unreadable)?;
        let mtime = metadata::modified_secs(&stat).map_err(unreadable)?;
        let local = LocalMetadata {
            mtime,
            version: asset.version.clone(),
            checksums: asset.checksums.clone(),
        };
        self.store.set(self.path(), &local).await?;
        debug!("Recorded {} metadata for {}", self.store.name(), self.path().display());
        Ok(())
    }

    /// Compute the state, decide, and apply when out of sync. With
    /// `dry_run` nothing on disk changes.
    pub async fn reconcile(&mut self, dry_run: bool) -> Result<SyncOutcome, SyncError> {
        let desired = self.options.ensure.clone();
        let current = self.current_state().await?;
        if self.is_in_sync(&current, &desired).await? {
            info!("{} is in sync ({})", self.path().display(), current);
            return Ok(SyncOutcome::InSync(current));
        }

        info!(
            "{} is out of sync: {} -> {}",
            self.path().display(),
            current,
            desired
        );
        if dry_run {
            return Ok(SyncOutcome::WouldChange {
                from: current,
                to: desired,
            });
        }
        self.apply(&desired).await
    }
}
