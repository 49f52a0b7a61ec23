//! Picks the asset to install out of the registry's search results.
//!
//! A resolver lives for exactly one reconciliation. Within that run the
//! search results and the "latest" pick are fetched and ranked once, so
//! every question asked of the registry sees the same snapshot. Nothing is
//! shared between runs.

use tracing::debug;

use crate::error::SyncError;
use crate::registry::{ArtifactRecord, RegistryClient, ResolvedAsset};
use crate::version;

/// How to choose among the published versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Latest,
    Exact(String),
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Latest => f.write_str("latest"),
            Selector::Exact(v) => f.write_str(v),
        }
    }
}

pub struct ArtifactResolver {
    client: RegistryClient,
    records: Option<Vec<ArtifactRecord>>,
    latest: Option<Option<ResolvedAsset>>,
    ranking_passes: u32,
}

impl ArtifactResolver {
    pub fn new(client: RegistryClient) -> Self {
        Self {
            client,
            records: None,
            latest: None,
            ranking_passes: 0,
        }
    }

    /// How many times the full record list has been ranked for "latest".
    pub fn ranking_passes(&self) -> u32 {
        self.ranking_passes
    }

    /// Resolve `selector`, failing with `ArtifactNotFound` when nothing in
    /// the registry matches.
    pub async fn resolve(&mut self, selector: &Selector) -> Result<ResolvedAsset, SyncError> {
        match self.find(selector).await? {
            Some(asset) => Ok(asset),
            None => {
                let query = self.client.query();
                Err(SyncError::ArtifactNotFound {
                    repository: query.repository.clone(),
                    artifact: query.artifact.clone(),
                    version: selector.to_string(),
                    server: query.server.clone(),
                })
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but reports "no match" as `None`.
    /// Registry failures are still errors.
    pub async fn find(&mut self, selector: &Selector) -> Result<Option<ResolvedAsset>, SyncError> {
        if let Selector::Latest = selector {
            if let Some(latest) = &self.latest {
                debug!("Using memoized latest artifact");
                return Ok(latest.clone());
            }
        }

        let records = self.records().await?;
        let found = match selector {
            Selector::Latest => select_latest(records).and_then(ArtifactRecord::first_asset),
            Selector::Exact(version) => {
                select_exact(records, version).and_then(ArtifactRecord::first_asset)
            }
        };

        if let Selector::Latest = selector {
            self.ranking_passes += 1;
            self.latest = Some(found.clone());
        }

        if let Some(asset) = &found {
            debug!(
                "Resolved '{}' to version {:?} at {}",
                selector, asset.version, asset.download_url
            );
        }
        Ok(found)
    }

    async fn records(&mut self) -> Result<&[ArtifactRecord], SyncError> {
        if self.records.is_none() {
            self.records = Some(self.client.search().await?);
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }
}

/// Highest version wins; records without a version lose to any versioned
/// record. Among equal versions the one listed last wins. That tie-break is
/// arbitrary and says nothing about upload order.
pub fn select_latest(records: &[ArtifactRecord]) -> Option<&ArtifactRecord> {
    // `max_by` returns the last of several equal maxima.
    records
        .iter()
        .max_by(|a, b| version::compare(a.version(), b.version()))
}

/// First record whose version is exactly `version`.
pub fn select_exact<'a>(records: &'a [ArtifactRecord], version: &str) -> Option<&'a ArtifactRecord> {
    records.iter().find(|r| r.version() == Some(version))
}
