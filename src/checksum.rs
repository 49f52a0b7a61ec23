//! File digests under the checksum families Nexus publishes.
//!
//! Unknown algorithm names and read failures are not errors here: callers
//! skip the algorithm and move on to the next one, and only treat running
//! out of algorithms as a failure.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Algorithm name to lowercase hex digest, ordered by algorithm name so that
/// every walk over the map is deterministic.
pub type Checksums = BTreeMap<String, String>;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Look up an algorithm by the name the registry uses for it.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" | "sha-1" => Some(Self::Sha1),
            "sha224" | "sha-224" => Some(Self::Sha224),
            "sha256" | "sha-256" => Some(Self::Sha256),
            "sha384" | "sha-384" => Some(Self::Sha384),
            "sha512" | "sha-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn hash_file(&self, path: &Path) -> std::io::Result<String> {
        match self {
            Self::Md5 => hash_file::<Md5>(path),
            Self::Sha1 => hash_file::<Sha1>(path),
            Self::Sha224 => hash_file::<Sha224>(path),
            Self::Sha256 => hash_file::<Sha256>(path),
            Self::Sha384 => hash_file::<Sha384>(path),
            Self::Sha512 => hash_file::<Sha512>(path),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental digest so large artifacts are never held in memory.
fn hash_file<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Digest comparison is case-insensitive; registries are not consistent
/// about hex casing.
pub fn digests_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Compute the digest of `path` under the algorithm called `name`.
///
/// Returns `None` when the algorithm is unknown or the file could not be
/// hashed.
pub async fn file_checksum(path: &Path, name: &str) -> Option<String> {
    let Some(algorithm) = ChecksumAlgorithm::from_name(name) else {
        tracing::debug!("Unsupported checksum algorithm '{}', skipping", name);
        return None;
    };

    tracing::debug!("Processing {} with checksum {}", path.display(), algorithm);
    let owned: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(move || algorithm.hash_file(&owned)).await {
        Ok(Ok(digest)) => Some(digest),
        Ok(Err(e)) => {
            tracing::debug!("Could not use checksum {} on {}: {}", algorithm, path.display(), e);
            None
        }
        Err(e) => {
            tracing::debug!("Checksum task for {} failed: {}", path.display(), e);
            None
        }
    }
}

/// Return the first algorithm (in name order) whose local digest matches the
/// declared one.
pub async fn find_match(path: &Path, declared: &Checksums) -> Option<ChecksumAlgorithm> {
    for (name, expected) in declared {
        if let Some(actual) = file_checksum(path, name).await {
            if digests_equal(&actual, expected) {
                return ChecksumAlgorithm::from_name(name);
            }
            tracing::debug!(
                "Local {} digest {} does not match registry digest {} for {}",
                name,
                actual,
                expected,
                path.display()
            );
        }
    }
    None
}

/// Result of checking a freshly downloaded file against declared digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every computable digest matched; the list names the algorithms used.
    Verified(Vec<ChecksumAlgorithm>),
    /// A computable digest disagreed with the declared one.
    Mismatch {
        algorithm: String,
        expected: String,
        actual: String,
    },
    /// None of the declared algorithms could be computed.
    NothingComputable,
}

/// Verify a downloaded file.
///
/// Stops at the first computed mismatch. Algorithms that cannot be computed
/// are skipped.
pub async fn verify_file(path: &Path, declared: &Checksums) -> Verification {
    let mut verified = Vec::new();
    for (name, expected) in declared {
        let Some(actual) = file_checksum(path, name).await else {
            continue;
        };
        if !digests_equal(&actual, expected) {
            return Verification::Mismatch {
                algorithm: name.clone(),
                expected: expected.clone(),
                actual,
            };
        }
        if let Some(algorithm) = ChecksumAlgorithm::from_name(name) {
            verified.push(algorithm);
        }
    }

    if verified.is_empty() {
        Verification::NothingComputable
    } else {
        Verification::Verified(verified)
    }
}
