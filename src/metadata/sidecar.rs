use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::MetadataError;
use super::{LocalMetadata, MetadataKeys, MetadataStore};

const SIDECAR_SUFFIX: &str = ".nexus-meta.json";

/// Keeps metadata in a hidden JSON file beside the target:
/// `/opt/app/tool.bin` → `/opt/app/.tool.bin.nexus-meta.json`.
///
/// Works on any file system. A sidecar left behind after the target is
/// deleted out-of-band is ignored, because lookups require the target to
/// exist.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    keys: MetadataKeys,
}

impl SidecarStore {
    pub fn new(keys: MetadataKeys) -> Self {
        Self { keys }
    }

    pub fn sidecar_path(path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_string_lossy();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Some(dir.join(format!(".{}{}", name, SIDECAR_SUFFIX)))
    }
}

#[async_trait]
impl MetadataStore for SidecarStore {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn get(&self, path: &Path) -> Result<Option<LocalMetadata>, MetadataError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let Some(sidecar) = Self::sidecar_path(path) else {
            return Ok(None);
        };

        let contents = match fs::read(&sidecar).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MetadataError::Read {
                    path: sidecar,
                    source,
                })
            }
        };

        let attrs: BTreeMap<String, String> = serde_json::from_slice(&contents)
            .map_err(|source| MetadataError::Malformed {
                path: sidecar.clone(),
                source,
            })?;
        Ok(self.keys.decode(&attrs))
    }

    async fn set(&self, path: &Path, metadata: &LocalMetadata) -> Result<(), MetadataError> {
        let sidecar = Self::sidecar_path(path).ok_or_else(|| MetadataError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })?;

        let attrs = self.keys.encode(metadata);
        let body = serde_json::to_vec_pretty(&attrs).map_err(|source| MetadataError::Malformed {
            path: sidecar.clone(),
            source,
        })?;

        // Write-then-rename so a reader never sees a half-written sidecar.
        let mut staging = sidecar.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let written = async {
            fs::write(&staging, &body).await?;
            fs::rename(&staging, &sidecar).await
        }
        .await;

        if let Err(source) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(MetadataError::Write {
                path: sidecar,
                source,
            });
        }

        tracing::debug!("Wrote metadata sidecar {}", sidecar.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SidecarStore {
        SidecarStore::new(MetadataKeys::with_prefix("user"))
    }

    fn sample() -> LocalMetadata {
        LocalMetadata {
            mtime: 1_700_000_000,
            version: Some("1.2.3".into()),
            checksums: [("sha1".to_string(), "abc".to_string())].into_iter().collect(),
        }
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            SidecarStore::sidecar_path(Path::new("/opt/app/tool.bin")),
            Some(PathBuf::from("/opt/app/.tool.bin.nexus-meta.json"))
        );
        assert_eq!(SidecarStore::sidecar_path(Path::new("/")), None);
    }

    #[tokio::test]
    async fn test_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"x").unwrap();

        assert_eq!(store().get(&path).await.unwrap(), None);

        store().set(&path, &sample()).await.unwrap();
        assert_eq!(store().get(&path).await.unwrap(), Some(sample()));

        let newer = LocalMetadata {
            mtime: 1_800_000_000,
            version: None,
            checksums: Default::default(),
        };
        store().set(&path, &newer).await.unwrap();
        assert_eq!(store().get(&path).await.unwrap(), Some(newer));
        assert!(!dir.path().join(".tool.bin.nexus-meta.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_orphaned_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"x").unwrap();
        store().set(&path, &sample()).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        assert_eq!(store().get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_other_privilege_level_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"x").unwrap();

        SidecarStore::new(MetadataKeys::with_prefix("trusted"))
            .set(&path, &sample())
            .await
            .unwrap();
        assert_eq!(store().get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"x").unwrap();
        std::fs::write(dir.path().join(".tool.bin.nexus-meta.json"), b"not json").unwrap();

        assert!(matches!(
            store().get(&path).await,
            Err(MetadataError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join("tool.bin");
        assert!(matches!(
            store().set(&path, &sample()).await,
            Err(MetadataError::Write { .. })
        ));
    }
}
