//! In-memory registry used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::install::error::DownloadError;
use crate::registry::{RegistryError, RegistryTransport, TransportResponse};

enum SearchBehavior {
    Pages(Vec<Value>),
    Status(u16, String),
    Raw(Vec<u8>),
}

pub(crate) enum DownloadBehavior {
    Body(Vec<u8>),
    Status(u16),
    /// Write the bytes, then fail as if the connection dropped.
    FailAfter(Vec<u8>),
}

pub(crate) struct FakeRegistry {
    search: SearchBehavior,
    downloads: Mutex<HashMap<String, DownloadBehavior>>,
    requests: Mutex<Vec<String>>,
}

pub(crate) fn asset_url(version: &str) -> String {
    format!("https://nexus.example.com/repository/releases/app/app-{}.bin", version)
}

pub(crate) fn payload(version: &str) -> Vec<u8> {
    format!("payload for app {}\n", version).into_bytes()
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A search item whose single asset serves [`payload`] for `version`.
pub(crate) fn record(version: &str) -> Value {
    json!({
        "repository": "releases",
        "name": "app",
        "version": version,
        "assets": [{
            "downloadUrl": asset_url(version),
            "checksum": { "sha256": sha256_hex(&payload(version)) }
        }]
    })
}

pub(crate) fn record_without_version(url: &str) -> Value {
    json!({ "assets": [{ "downloadUrl": url, "checksum": {} }] })
}

pub(crate) fn page(items: Vec<Value>, token: Option<&str>) -> Value {
    match token {
        Some(token) => json!({ "items": items, "continuationToken": token }),
        None => json!({ "items": items }),
    }
}

impl FakeRegistry {
    /// Serve `pages` in order; every `downloadUrl` made by [`record`] is
    /// downloadable.
    pub(crate) fn with_pages(pages: Vec<Value>) -> Self {
        let mut downloads = HashMap::new();
        for page in &pages {
            for item in page["items"].as_array().into_iter().flatten() {
                if let Some(version) = item["version"].as_str() {
                    downloads.insert(asset_url(version), DownloadBehavior::Body(payload(version)));
                }
            }
        }
        Self {
            search: SearchBehavior::Pages(pages),
            downloads: Mutex::new(downloads),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_records(records: Vec<Value>) -> Self {
        Self::with_pages(vec![page(records, None)])
    }

    pub(crate) fn with_status(status: u16, reason: &str) -> Self {
        Self {
            search: SearchBehavior::Status(status, reason.to_string()),
            downloads: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_raw_body(body: Vec<u8>) -> Self {
        Self {
            search: SearchBehavior::Raw(body),
            downloads: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_download(&self, url: &str, behavior: DownloadBehavior) {
        self.downloads
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn search_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|u| u.contains("/service/rest/v1/search"))
            .count()
    }

    pub(crate) fn download_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|u| u.contains("/repository/"))
            .count()
    }

    fn record_request(&self, url: &str) {
        self.requests.lock().unwrap().push(url.to_string());
    }
}

/// The first page for a fresh search, otherwise the page following the one
/// that handed out the requested token.
fn page_index(pages: &[Value], url: &Url) -> usize {
    let token = url
        .query_pairs()
        .find(|(key, _)| key == "continuationToken")
        .map(|(_, value)| value.into_owned());
    match token {
        None => 0,
        Some(token) => pages
            .iter()
            .position(|p| p["continuationToken"].as_str() == Some(token.as_str()))
            .map_or(pages.len(), |i| i + 1),
    }
}

#[async_trait]
impl RegistryTransport for FakeRegistry {
    async fn get(&self, url: &Url) -> Result<TransportResponse, RegistryError> {
        self.record_request(url.as_str());
        match &self.search {
            SearchBehavior::Pages(pages) => match pages.get(page_index(pages, url)) {
                Some(page) => Ok(TransportResponse {
                    status: 200,
                    reason: "OK".into(),
                    body: serde_json::to_vec(page).unwrap(),
                }),
                None => Err(RegistryError::transport(url.as_str(), "no more pages")),
            },
            SearchBehavior::Status(status, reason) => Ok(TransportResponse {
                status: *status,
                reason: reason.clone(),
                body: Vec::new(),
            }),
            SearchBehavior::Raw(body) => Ok(TransportResponse {
                status: 200,
                reason: "OK".into(),
                body: body.clone(),
            }),
        }
    }

    async fn download(&self, url: &str, file: &mut File) -> Result<u64, DownloadError> {
        self.record_request(url);
        let behavior = match self.downloads.lock().unwrap().get(url) {
            Some(DownloadBehavior::Body(b)) => DownloadBehavior::Body(b.clone()),
            Some(DownloadBehavior::Status(s)) => DownloadBehavior::Status(*s),
            Some(DownloadBehavior::FailAfter(b)) => DownloadBehavior::FailAfter(b.clone()),
            None => DownloadBehavior::Status(404),
        };
        match behavior {
            DownloadBehavior::Body(bytes) => {
                file.write_all(&bytes).await?;
                Ok(bytes.len() as u64)
            }
            DownloadBehavior::Status(status) => Err(DownloadError::HttpStatus {
                status,
                url: url.to_string(),
            }),
            DownloadBehavior::FailAfter(bytes) => {
                file.write_all(&bytes).await?;
                Err(DownloadError::Http {
                    url: url.to_string(),
                    bytes_written: bytes.len() as u64,
                    source: "operation timed out".into(),
                })
            }
        }
    }
}
