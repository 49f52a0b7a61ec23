use serde::Deserialize;

use crate::checksum::Checksums;

/// One page of `GET /service/rest/v1/search`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<ArtifactRecord>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

/// A component returned by the search API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ArtifactRecord {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

impl ArtifactRecord {
    /// The version, treating an empty string the same as a missing one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    /// Attach this record's version to its first asset.
    pub fn first_asset(&self) -> Option<ResolvedAsset> {
        let asset = self.assets.first()?;
        Some(ResolvedAsset {
            download_url: asset.download_url.clone(),
            version: self.version().map(str::to_owned),
            checksums: asset.checksum.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub download_url: String,
    #[serde(default)]
    pub checksum: Checksums,
}

/// The asset picked for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub download_url: String,
    pub version: Option<String>,
    pub checksums: Checksums,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nexus_search_page() {
        let body = r#"{
            "items": [{
                "id": "cHlwaTo2",
                "repository": "PyPi",
                "format": "pypi",
                "name": "pip",
                "version": "23.1",
                "assets": [{
                    "downloadUrl": "https://nexus/repository/PyPi/pip-23.1.tar.gz",
                    "path": "pip-23.1.tar.gz",
                    "checksum": {"sha1": "aa", "md5": "bb", "sha256": "cc"}
                }, {
                    "downloadUrl": "https://nexus/repository/PyPi/pip-23.1-py3-none-any.whl",
                    "checksum": {"sha1": "dd"}
                }]
            }],
            "continuationToken": "abc123"
        }"#;
        let page: SearchPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.continuation_token.as_deref(), Some("abc123"));
        assert_eq!(page.items.len(), 1);

        let asset = page.items[0].first_asset().unwrap();
        assert_eq!(asset.version.as_deref(), Some("23.1"));
        assert_eq!(
            asset.download_url,
            "https://nexus/repository/PyPi/pip-23.1.tar.gz"
        );
        let names: Vec<&str> = asset.checksums.keys().map(String::as_str).collect();
        assert_eq!(names, ["md5", "sha1", "sha256"]);
    }

    #[test]
    fn test_decode_null_token_and_missing_fields() {
        let page: SearchPage =
            serde_json::from_str(r#"{"items": [{"assets": []}], "continuationToken": null}"#)
                .unwrap();
        assert!(page.continuation_token.is_none());
        assert_eq!(page.items[0].version(), None);
        assert!(page.items[0].first_asset().is_none());
    }

    #[test]
    fn test_empty_version_treated_as_absent() {
        let record = ArtifactRecord {
            version: Some(String::new()),
            assets: vec![],
        };
        assert_eq!(record.version(), None);
    }
}
