//! HTTP plumbing shared by registry search and asset download.
//!
//! The engine only ever sees the [`RegistryTransport`] trait, so tests can
//! swap in an in-memory registry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::error::RegistryError;
use super::query::{ArtifactQuery, Credentials};
use crate::install::error::DownloadError;
use crate::types::Protocol;

/// Raw answer to a GET, before any status or body interpretation.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Issue a GET and return status and body. Only transport-level
    /// failures are errors here.
    async fn get(&self, url: &Url) -> Result<TransportResponse, RegistryError>;

    /// Stream the body at `url` into `file` and return the number of bytes
    /// written. The file is not flushed.
    async fn download(&self, url: &str, file: &mut File) -> Result<u64, DownloadError>;
}

/// `reqwest`-backed transport configured from an [`ArtifactQuery`]: basic
/// auth, proxy, CA trust and connection timeout.
pub struct HttpTransport {
    client: Client,
    credentials: Option<Credentials>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(query: &ArtifactQuery) -> Result<Self, RegistryError> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));

        if let Some(timeout) = query.connection_timeout.filter(|t| !t.is_zero()) {
            builder = builder.timeout(timeout);
        }

        if let Some(proxy_config) = &query.proxy {
            let mut proxy = reqwest::Proxy::all(proxy_config.url.as_str())
                .map_err(|e| RegistryError::Client(format!("invalid proxy: {}", e)))?;
            if let Some(creds) = &proxy_config.credentials {
                proxy = proxy.basic_auth(&creds.user, &creds.password);
            }
            builder = builder.proxy(proxy);
        }

        if query.protocol == Protocol::Https {
            if !query.tls.verify {
                tracing::warn!("TLS certificate verification disabled for {}", query.server);
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(ca) = &query.tls.ca_certificate {
                for cert in load_ca_certificates(ca)? {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Client(e.to_string()))?;

        Ok(Self {
            client,
            credentials: query.credentials.clone(),
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let builder = self.client.get(url);
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.user, Some(&creds.password)),
            None => builder,
        }
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, RegistryError> {
        let response = self
            .request(url.as_str())
            .send()
            .await
            .map_err(|e| RegistryError::transport(url.as_str(), e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::transport(url.as_str(), e))?;

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: body.to_vec(),
        })
    }

    async fn download(&self, url: &str, file: &mut File) -> Result<u64, DownloadError> {
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http {
                url: url.to_string(),
                bytes_written: 0,
                source: Box::new(e),
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let content_length = response.content_length();
        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::warn!(
                    "Body error for {} (content_length={:?}, bytes_so_far={}): {}",
                    url,
                    content_length,
                    bytes_written,
                    e
                );
                DownloadError::Http {
                    url: url.to_string(),
                    bytes_written,
                    source: Box::new(e),
                }
            })?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }

        Ok(bytes_written)
    }
}

/// Load trust anchors from a PEM bundle, or from every `.pem`/`.crt` file in
/// a directory.
fn load_ca_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, RegistryError> {
    if !path.exists() {
        return Err(RegistryError::MissingCaCertificate(path.to_path_buf()));
    }

    let files = if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|e| {
            RegistryError::Client(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|ext| ext.to_str()),
                    Some("pem" | "crt")
                )
            })
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut certificates = Vec::new();
    for file in files {
        let pem = std::fs::read(&file).map_err(|e| {
            RegistryError::Client(format!("cannot read {}: {}", file.display(), e))
        })?;
        let bundle = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            RegistryError::Client(format!("invalid certificate {}: {}", file.display(), e))
        })?;
        tracing::debug!("Loaded {} CA certificate(s) from {}", bundle.len(), file.display());
        certificates.extend(bundle);
    }
    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::error::SyncError;
    use crate::install::Installer;
    use crate::registry::ResolvedAsset;

    /// One canned HTTP response, written in pieces.
    struct Reply {
        head: String,
        chunks: Vec<Vec<u8>>,
        /// Keep the connection open without finishing the body.
        stall: bool,
    }

    impl Reply {
        fn new(status_line: &str, body: &[u8], pieces: usize) -> Self {
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            let size = body.len().div_ceil(pieces.max(1)).max(1);
            Self {
                head,
                chunks: body.chunks(size).map(<[u8]>::to_vec).collect(),
                stall: false,
            }
        }

        fn stalled(mut self, sent: usize) -> Self {
            let mut kept = Vec::new();
            let mut budget = sent;
            for chunk in self.chunks {
                if budget == 0 {
                    break;
                }
                let take = chunk.len().min(budget);
                kept.push(chunk[..take].to_vec());
                budget -= take;
            }
            self.chunks = kept;
            self.stall = true;
            self
        }
    }

    /// A local HTTP/1.1 server that answers one connection per reply, in
    /// order, and keeps the raw request heads it saw.
    async fn serve(replies: Vec<Reply>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                log.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).into_owned());

                socket.write_all(reply.head.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                for chunk in &reply.chunks {
                    socket.write_all(chunk).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                if reply.stall {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        });

        (addr, seen)
    }

    fn header(request: &str, name: &str) -> Option<String> {
        request.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn local_query(addr: SocketAddr) -> ArtifactQuery {
        let mut query = ArtifactQuery::new(addr.to_string(), "releases", "app");
        query.protocol = Protocol::Http;
        query.credentials = Some(Credentials {
            user: "deploy".into(),
            password: "hunter2".into(),
        });
        query
    }

    fn body_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    const DEPLOY_AUTH: &str = "Basic ZGVwbG95Omh1bnRlcjI=";

    #[tokio::test]
    async fn test_get_returns_status_reason_and_body() {
        let (addr, _) = serve(vec![Reply::new("503 Service Unavailable", b"down", 1)]).await;
        let query = local_query(addr);
        let transport = HttpTransport::new(&query).unwrap();

        let response = transport.get(&query.search_url().unwrap()).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.reason, "Service Unavailable");
        assert_eq!(response.body, b"down");
    }

    #[tokio::test]
    async fn test_credentials_sent_on_search_and_download() {
        let (addr, seen) = serve(vec![
            Reply::new("200 OK", br#"{"items":[]}"#, 1),
            Reply::new("200 OK", b"payload", 1),
        ])
        .await;
        let query = local_query(addr);
        let transport = HttpTransport::new(&query).unwrap();

        transport.get(&query.search_url().unwrap()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("app.bin")).await.unwrap();
        transport
            .download(&format!("http://{}/repository/releases/app.bin", addr), &mut file)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("GET /service/rest/v1/search?"), "{}", seen[0]);
        assert!(seen[1].starts_with("GET /repository/releases/app.bin "), "{}", seen[1]);
        for request in seen.iter() {
            assert_eq!(header(request, "authorization").as_deref(), Some(DEPLOY_AUTH));
        }
    }

    #[tokio::test]
    async fn test_no_credentials_sends_no_authorization() {
        let (addr, seen) = serve(vec![Reply::new("200 OK", b"{}", 1)]).await;
        let mut query = local_query(addr);
        query.credentials = None;
        let transport = HttpTransport::new(&query).unwrap();

        transport.get(&query.search_url().unwrap()).await.unwrap();
        assert_eq!(header(&seen.lock().unwrap()[0], "authorization"), None);
    }

    #[tokio::test]
    async fn test_download_writes_every_chunk() {
        let body = body_of(200_000);
        let (addr, _) = serve(vec![Reply::new("200 OK", &body, 7)]).await;
        let transport = HttpTransport::new(&local_query(addr)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        let mut file = File::create(&path).await.unwrap();
        let written = transport
            .download(&format!("http://{}/app.bin", addr), &mut file)
            .await
            .unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_non_success_is_http_status() {
        let (addr, _) = serve(vec![Reply::new("404 Not Found", b"missing", 1)]).await;
        let transport = HttpTransport::new(&local_query(addr)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("app.bin")).await.unwrap();
        let url = format!("http://{}/app.bin", addr);
        let err = transport.download(&url, &mut file).await.unwrap_err();
        match err {
            DownloadError::HttpStatus { status, url: failed } => {
                assert_eq!(status, 404);
                assert_eq!(failed, url);
            }
            other => panic!("expected HttpStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_download_times_out_and_leaves_no_temp_file() {
        let body = body_of(10_000);
        let (addr, _) = serve(vec![Reply::new("200 OK", &body, 4).stalled(2_500)]).await;
        let mut query = local_query(addr);
        query.connection_timeout = Some(Duration::from_secs(1));
        let installer = Installer::new(Arc::new(HttpTransport::new(&query).unwrap()), false);

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app.bin");
        let asset = ResolvedAsset {
            download_url: format!("http://{}/app.bin", addr),
            version: Some("1.0.0".into()),
            checksums: Default::default(),
        };

        let err = installer.install(&asset, &target).await.unwrap_err();
        assert!(
            matches!(
                err,
                SyncError::Download {
                    source: DownloadError::Http { .. },
                    ..
                }
            ),
            "{:?}",
            err
        );
        assert!(!dir.path().join(".app.bin").exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_missing_ca_certificate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut query = ArtifactQuery::new("nexus.example.com", "r", "a");
        query.tls.ca_certificate = Some(dir.path().join("missing.pem"));
        let err = HttpTransport::new(&query).unwrap_err();
        assert!(matches!(err, RegistryError::MissingCaCertificate(_)));
        assert!(err.to_string().contains("missing.pem"));
    }

    #[test]
    fn test_empty_ca_directory_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), "not a cert").unwrap();
        assert!(load_ca_certificates(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_ca_certificate_ignored_for_plain_http() {
        let mut query = ArtifactQuery::new("nexus.example.com", "r", "a");
        query.protocol = Protocol::Http;
        query.tls.ca_certificate = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(HttpTransport::new(&query).is_ok());
    }

    #[test]
    fn test_debug_hides_password() {
        let mut query = ArtifactQuery::new("nexus.example.com", "r", "a");
        query.credentials = Some(Credentials {
            user: "deploy".into(),
            password: "hunter2".into(),
        });
        let transport = HttpTransport::new(&query).unwrap();
        assert!(!format!("{:?}", transport).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_get_connection_refused_is_transport_error() {
        let mut query = ArtifactQuery::new("127.0.0.1:1", "r", "a");
        query.protocol = Protocol::Http;
        let transport = HttpTransport::new(&query).unwrap();
        let url = query.search_url().unwrap();
        let err = transport.get(&url).await.unwrap_err();
        assert!(matches!(err, RegistryError::Transport { .. }));
    }
}
