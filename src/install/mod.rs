//! Download, verify and atomically install a resolved asset.
//!
//! The payload is streamed into a hidden file next to the target
//! (`<dir>/.<filename>`) so the final step is a rename within one file
//! system. Readers of the target see either the old file or the complete
//! new one, never a partial download.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::checksum::{self, Verification};
use crate::error::SyncError;
use crate::registry::{RegistryTransport, ResolvedAsset};

/// Removes the temp file when dropped unless the install completed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove temp file {}: {}", self.path.display(), e),
        }
    }
}

/// Fail unless the directory that will hold `target` already exists.
/// Directories are never created.
pub fn ensure_parent_dir(target: &Path) -> Result<PathBuf, SyncError> {
    if target.file_name().is_none() {
        return Err(SyncError::InvalidTarget(target.to_path_buf()));
    }
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(SyncError::MissingParentDirectory(parent));
    }
    Ok(parent)
}

/// `/opt/app/tool.bin` → `/opt/app/.tool.bin`
pub fn temp_path(target: &Path) -> Result<PathBuf, SyncError> {
    let parent = ensure_parent_dir(target)?;
    let name = target
        .file_name()
        .ok_or_else(|| SyncError::InvalidTarget(target.to_path_buf()))?;
    let mut hidden = std::ffi::OsString::from(".");
    hidden.push(name);
    Ok(parent.join(hidden))
}

pub struct Installer {
    transport: Arc<dyn RegistryTransport>,
    verify_download: bool,
}

impl Installer {
    pub fn new(transport: Arc<dyn RegistryTransport>, verify_download: bool) -> Self {
        Self {
            transport,
            verify_download,
        }
    }

    /// Download `asset` and move it into place at `target`.
    ///
    /// On any failure the temp file is gone and `target` is unchanged.
    pub async fn install(&self, asset: &ResolvedAsset, target: &Path) -> Result<(), SyncError> {
        let temp = temp_path(target)?;
        let mut guard = TempFileGuard::new(temp.clone());

        tracing::debug!("Downloading {} to {}", asset.download_url, temp.display());
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)
            .await
            .map_err(|e| SyncError::io(&temp, e))?;

        let bytes = self
            .transport
            .download(&asset.download_url, &mut file)
            .await
            .map_err(|source| SyncError::Download {
                url: asset.download_url.clone(),
                source,
            })?;
        file.flush().await.map_err(|e| SyncError::io(&temp, e))?;
        file.sync_all().await.map_err(|e| SyncError::io(&temp, e))?;
        drop(file);
        tracing::debug!("Downloaded {} bytes from {}", bytes, asset.download_url);

        if self.verify_download {
            self.verify(&temp, asset).await?;
        }

        fs::rename(&temp, target)
            .await
            .map_err(|e| SyncError::io(target, e))?;
        guard.disarm();

        tracing::info!(
            "Installed {} version {}",
            target.display(),
            asset.version.as_deref().unwrap_or("(unversioned)")
        );
        Ok(())
    }

    async fn verify(&self, temp: &Path, asset: &ResolvedAsset) -> Result<(), SyncError> {
        match checksum::verify_file(temp, &asset.checksums).await {
            Verification::Verified(algorithms) => {
                tracing::debug!("Verified {} with {:?}", asset.download_url, algorithms);
                Ok(())
            }
            Verification::Mismatch {
                algorithm,
                expected,
                actual,
            } => Err(SyncError::ChecksumMismatch {
                path: temp.to_path_buf(),
                algorithm,
                expected,
                actual,
            }),
            Verification::NothingComputable => {
                Err(SyncError::NoChecksumComputable(temp.to_path_buf()))
            }
        }
    }

    /// Delete `target`. Returns whether a file was removed.
    pub async fn remove(&self, target: &Path) -> Result<bool, SyncError> {
        let metadata = match fs::symlink_metadata(target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SyncError::io(target, e)),
        };
        if metadata.is_dir() {
            return Err(SyncError::RefusingToRemoveDirectory(target.to_path_buf()));
        }
        fs::remove_file(target)
            .await
            .map_err(|e| SyncError::io(target, e))?;
        tracing::info!("Removed {}", target.display());
        Ok(true)
    }
}
