use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::MetadataError;
use super::{LocalMetadata, MetadataKeys, MetadataStore};

/// Keeps metadata in the target file's extended attributes.
///
/// The attributes travel with the file, so a rename keeps them and a
/// replacement (any install) drops them.
#[derive(Debug, Clone)]
pub struct XattrStore {
    keys: MetadataKeys,
}

impl XattrStore {
    pub fn new(keys: MetadataKeys) -> Self {
        Self { keys }
    }
}

fn read_attrs(path: &Path, keys: &MetadataKeys) -> std::io::Result<BTreeMap<String, String>> {
    let mut attrs = BTreeMap::new();
    for name in ::xattr::list(path)? {
        let Some(name) = name.to_str() else { continue };
        if !keys.owns(name) {
            continue;
        }
        if let Some(value) = ::xattr::get(path, name)? {
            attrs.insert(name.to_string(), String::from_utf8_lossy(&value).into_owned());
        }
    }
    Ok(attrs)
}

/// The mtime key is what marks a record as complete, so it is cleared first
/// and written last. A failure part way through removes every owned key
/// rather than leave a fresh mtime next to stale values.
fn write_attrs(
    path: &Path,
    keys: &MetadataKeys,
    attrs: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    let result = replace_attrs(path, keys, attrs);
    if result.is_err() {
        clear_attrs(path, keys);
    }
    result
}

fn replace_attrs(
    path: &Path,
    keys: &MetadataKeys,
    attrs: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    let mtime_key = keys.mtime();
    let present = ::xattr::list(path)?
        .filter_map(|name| name.to_str().map(str::to_string))
        .filter(|name| keys.owns(name))
        .collect::<Vec<_>>();

    if present.contains(&mtime_key) {
        ::xattr::remove(path, &mtime_key)?;
    }
    // Drop checksums for algorithms the new record no longer carries.
    for name in present.iter().filter(|n| **n != mtime_key) {
        if !attrs.contains_key(name) {
            ::xattr::remove(path, name)?;
        }
    }
    for (name, value) in attrs.iter().filter(|(n, _)| **n != mtime_key) {
        ::xattr::set(path, name, value.as_bytes())?;
    }
    if let Some(mtime) = attrs.get(&mtime_key) {
        ::xattr::set(path, &mtime_key, mtime.as_bytes())?;
    }
    Ok(())
}

fn clear_attrs(path: &Path, keys: &MetadataKeys) {
    let Ok(names) = ::xattr::list(path) else { return };
    for name in names {
        let Some(name) = name.to_str() else { continue };
        if keys.owns(name) {
            if let Err(e) = ::xattr::remove(path, name) {
                tracing::warn!("Could not clear {} on {}: {}", name, path.display(), e);
            }
        }
    }
}

#[async_trait]
impl MetadataStore for XattrStore {
    fn name(&self) -> &'static str {
        "xattr"
    }

    async fn get(&self, path: &Path) -> Result<Option<LocalMetadata>, MetadataError> {
        let owned: PathBuf = path.to_path_buf();
        let keys = self.keys.clone();
        let result = tokio::task::spawn_blocking(move || read_attrs(&owned, &keys)).await?;

        match result {
            Ok(attrs) => Ok(self.keys.decode(&attrs)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(MetadataError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn set(&self, path: &Path, metadata: &LocalMetadata) -> Result<(), MetadataError> {
        let owned: PathBuf = path.to_path_buf();
        let keys = self.keys.clone();
        let attrs = self.keys.encode(metadata);
        tokio::task::spawn_blocking(move || write_attrs(&owned, &keys, &attrs))
            .await?
            .map_err(|source| MetadataError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}
