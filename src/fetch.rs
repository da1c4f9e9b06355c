use crate::constants::PARTIAL_SUFFIX;
use crate::error::{PipelineError, Result};
use crate::staging::StagingFile;
use metrics::{counter, histogram};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// A snapshot that has been fully written to local staging.
#[derive(Debug)]
pub struct FetchedSnapshot {
    pub staging: StagingFile,
    pub bytes: u64,
    pub sha256: String,
}

pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("wiki_pageviews/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Stream `url` into `staging_path`.
    ///
    /// The body goes to `<staging_path>.part` first and is renamed into place
    /// only once complete; a failed transfer leaves nothing behind.
    #[instrument(skip(self, url, staging_path), fields(url = %url))]
    pub async fn fetch(&self, url: &str, staging_path: &Path) -> Result<FetchedSnapshot> {
        if let Some(parent) = staging_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }

        info!("📡 Downloading {}", url);
        let mut response = self.client.get(url).send().await.map_err(|e| {
            counter!("pageviews_fetch_errors_total", "kind" => "transport").increment(1);
            PipelineError::RemoteUnavailable {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            counter!("pageviews_fetch_errors_total", "kind" => "status").increment(1);
            warn!("Snapshot request returned {}", status);
            return Err(PipelineError::RemoteUnavailable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("expected 200 OK, got {status}"),
            });
        }

        let partial_path = partial_path(staging_path);
        let partial = StagingFile::adopt(&partial_path);
        let mut file = tokio::fs::File::create(&partial_path)
            .await
            .map_err(|e| PipelineError::io(&partial_path, e))?;

        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                counter!("pageviews_fetch_errors_total", "kind" => "body").increment(1);
                PipelineError::RemoteUnavailable {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    message: format!("body transfer interrupted after {bytes} bytes: {e}"),
                }
            })?;
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| PipelineError::io(&partial_path, e))?;
            bytes += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| PipelineError::io(&partial_path, e))?;
        drop(file);

        let staging = partial
            .persist_as(staging_path)
            .map_err(|e| PipelineError::io(staging_path, e))?;
        let sha256 = hex::encode(hasher.finalize());

        histogram!("pageviews_fetch_bytes").record(bytes as f64);
        debug!("Payload sha256={}", sha256);
        info!("✅ Downloaded {} bytes to {}", bytes, staging_path.display());

        Ok(FetchedSnapshot {
            staging,
            bytes,
            sha256,
        })
    }
}

fn partial_path(staging_path: &Path) -> PathBuf {
    let mut name = staging_path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SNAPSHOT_PATH: &str = "/other/pageviews/2025/2025-03/pageviews-20250308-070000.gz";

    #[tokio::test]
    async fn test_fetch_writes_body_and_digest() {
        let server = MockServer::start().await;
        let body = b"not really gzip but bytes are bytes".to_vec();
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let staging_path = dir.path().join("nested/data/pageviews-20250308-070000.gz");
        let fetcher = Fetcher::new(Some(Duration::from_secs(5))).unwrap();
        let fetched = fetcher
            .fetch(&format!("{}{}", server.uri(), SNAPSHOT_PATH), &staging_path)
            .await
            .unwrap();

        assert_eq!(fetched.bytes, body.len() as u64);
        assert_eq!(fetched.sha256, hex::encode(Sha256::digest(&body)));
        assert_eq!(std::fs::read(&staging_path).unwrap(), body);
        assert!(!partial_path(&staging_path).exists());

        drop(fetched);
        assert!(!staging_path.exists());
    }

    #[tokio::test]
    async fn test_non_200_is_remote_unavailable_and_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let staging_path = dir.path().join("pageviews-20250308-070000.gz");
        let fetcher = Fetcher::new(None).unwrap();
        let err = fetcher
            .fetch(&format!("{}{}", server.uri(), SNAPSHOT_PATH), &staging_path)
            .await
            .unwrap_err();

        match err {
            PipelineError::RemoteUnavailable { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("expected RemoteUnavailable, got {other:?}"),
        }
        assert!(!staging_path.exists());
        assert!(!partial_path(&staging_path).exists());
    }

    #[tokio::test]
    async fn test_other_success_codes_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let staging_path = dir.path().join("pageviews-20250308-070000.gz");
        let err = Fetcher::new(None)
            .unwrap()
            .fetch(&server.uri(), &staging_path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RemoteUnavailable { status: Some(204), .. }
        ));
        assert!(!staging_path.exists());
    }

    #[tokio::test]
    async fn test_interrupted_body_removes_partial_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        // Promises 100000 bytes, sends 5000, then hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\n")
                .await;
            let _ = stream.write_all(&[b'x'; 5000]).await;
            let _ = stream.flush().await;
        });

        let dir = tempdir().unwrap();
        let staging_path = dir.path().join("pageviews-20250308-070000.gz");
        let err = Fetcher::new(Some(Duration::from_secs(5)))
            .unwrap()
            .fetch(&format!("http://{addr}{SNAPSHOT_PATH}"), &staging_path)
            .await
            .unwrap_err();
        server.await.unwrap();

        match err {
            PipelineError::RemoteUnavailable { status, message, .. } => {
                assert_eq!(status, Some(200));
                assert!(message.contains("interrupted"), "{message}");
            }
            other => panic!("expected RemoteUnavailable, got {other:?}"),
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/data/pageviews-20250308-070000.gz")),
            PathBuf::from("/data/pageviews-20250308-070000.gz.part")
        );
    }
}
