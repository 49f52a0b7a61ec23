use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::error::RegistryError;
use super::query::ArtifactQuery;
use super::transport::RegistryTransport;
use super::types::{ArtifactRecord, SearchPage};

/// Searches a Nexus repository for every component matching the query.
pub struct RegistryClient {
    query: ArtifactQuery,
    transport: Arc<dyn RegistryTransport>,
}

impl RegistryClient {
    pub fn new(query: ArtifactQuery, transport: Arc<dyn RegistryTransport>) -> Self {
        Self { query, transport }
    }

    pub fn query(&self) -> &ArtifactQuery {
        &self.query
    }

    /// Fetch all matching records, following continuation tokens until the
    /// registry stops returning one.
    ///
    /// There is no page cap, but a token repeated verbatim by the next page
    /// is treated as a protocol error so a misbehaving server cannot keep
    /// us looping.
    pub async fn search(&self) -> Result<Vec<ArtifactRecord>, RegistryError> {
        let base = self.query.search_url()?;
        let mut items: Vec<ArtifactRecord> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            let url = page_url(&base, token.as_deref());
            let page = self.fetch_page(&url).await?;
            pages += 1;

            debug!(
                "Search '{}/{}': got {} items on page {}",
                self.query.repository,
                self.query.artifact,
                page.items.len(),
                pages
            );

            if pages == 1 && page.items.is_empty() {
                return Err(RegistryError::NoArtifactsFound {
                    url: base.to_string(),
                });
            }
            items.extend(page.items);

            let next = match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(next) => next,
                None => break,
            };
            if token.as_deref() == Some(next.as_str()) {
                return Err(RegistryError::RepeatedToken { token: next });
            }
            token = Some(next);

            if !self.query.page_delay.is_zero() {
                tokio::time::sleep(self.query.page_delay).await;
            }
        }

        debug!(
            "Search '{}/{}': {} items across {} page(s)",
            self.query.repository,
            self.query.artifact,
            items.len(),
            pages
        );
        Ok(items)
    }

    async fn fetch_page(&self, url: &Url) -> Result<SearchPage, RegistryError> {
        debug!("GET {}", url);
        let response = self.transport.get(url).await?;

        if response.status != 200 {
            return Err(RegistryError::HttpStatus {
                status: response.status,
                reason: response.reason,
                url: url.to_string(),
            });
        }

        serde_json::from_slice(&response.body).map_err(|source| RegistryError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// The base search URL never carries a token, so appending one always
/// replaces the previous page's.
fn page_url(base: &Url, token: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("continuationToken", token);
    }
    url
}
