// iPusnas Core - Borrowed e-book acquisition and unlocking
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Streaming fetch of remote artifacts into the staging directory
//!
//! # Key Features
//! - Staged file name is `safe_name(title).<ext>`, ext from the URL path
//! - An existing staged file is a cache hit: no request is made
//! - Chunks are written through a buffered writer as they arrive
//! - Data lands in a hidden `.part` file and is renamed onto the staged name
//!   only after the final flush, so a staged name is always a full download
//!
//! No retries: a failed fetch leaves nothing behind and can simply be re-run.

use crate::config::AppConfig;
use crate::download::progress::{FetchProgress, ProgressCallback, ProgressEvent, ProgressStage};
use crate::error::{PusnasError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::{extension_from_url, partial_path, safe_name, DEFAULT_EXTENSION};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Write buffer size
const DOWNLOAD_BUFF_SZ: usize = 64 * 1024;

/// Downloads artifacts into the staging directory
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: Client,
    staging_dir: PathBuf,
}

impl ContentFetcher {
    /// Create a fetcher with its own HTTP client
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.request_timeout())
            .timeout(config.download_timeout())
            .build()?;

        Ok(Self::with_client(client, config.staging_dir.clone()))
    }

    pub fn with_client(client: Client, staging_dir: PathBuf) -> Self {
        Self {
            client,
            staging_dir,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Staged path for a URL and title, falling back to `default_ext`.
    ///
    /// An unparseable URL is a `NetworkError`: it came from the catalog, not
    /// from the caller.
    pub fn cache_path(&self, url: &str, target_name: &str, default_ext: &str) -> Result<PathBuf> {
        let ext = extension_from_url(url)
            .map_err(|_| {
                PusnasError::network_error(
                    format!("Unusable download URL {:?}", redact_query(url)),
                    false,
                )
            })?
            .unwrap_or_else(|| default_ext.trim_start_matches('.').to_ascii_lowercase());
        Ok(self
            .staging_dir
            .join(format!("{}.{}", safe_name(target_name), ext)))
    }

    /// Fetch `url` into staging; extensionless URLs are staged as PDF
    pub async fn fetch(
        &self,
        url: &str,
        target_name: &str,
        on_progress: &ProgressCallback,
    ) -> Result<PathBuf> {
        self.fetch_with_default_ext(url, target_name, DEFAULT_EXTENSION, on_progress)
            .await
    }

    /// Fetch `url` into staging, returning the staged path.
    ///
    /// # Progress
    /// - Cache hit: one 100% event
    /// - Fresh download: 0%, then per-percent updates while the length is
    ///   known, then one 100% event after the file is in place
    pub async fn fetch_with_default_ext(
        &self,
        url: &str,
        target_name: &str,
        default_ext: &str,
        on_progress: &ProgressCallback,
    ) -> Result<PathBuf> {
        let staged = self.cache_path(url, target_name, default_ext)?;

        if FileManager::file_exists(&staged).await {
            info!(path = %staged.display(), "using cached download");
            on_progress(ProgressEvent::done(
                ProgressStage::Fetching,
                "File already in cache.",
            ));
            return Ok(staged);
        }

        FileManager::ensure_directory_exists(&self.staging_dir).await?;
        self.download(url, &staged, on_progress).await?;
        Ok(staged)
    }

    async fn download(&self, url: &str, staged: &Path, on_progress: &ProgressCallback) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PusnasError::network_error(
                format!("HTTP {} fetching {}", status, redact_query(url)),
                is_transient_status(status),
            ));
        }

        let mut progress = FetchProgress::new(response.content_length());
        on_progress(progress.started());
        debug!(
            url = %redact_query(url),
            content_length = ?response.content_length(),
            "download started"
        );

        let partial = partial_path(staged);
        let result = async {
            let file = File::create(&partial)
                .await
                .map_err(|e| PusnasError::write_error(&partial, e))?;
            let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFF_SZ, file);

            let mut stream = response.bytes_stream();
            while let Some(chunk_result) = stream.next().await {
                let chunk = chunk_result.map_err(|e| transport_error(url, e))?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| PusnasError::write_error(&partial, e))?;

                if let Some(event) = progress.advance(chunk.len() as u64) {
                    on_progress(event);
                }
            }

            writer
                .flush()
                .await
                .map_err(|e| PusnasError::write_error(&partial, e))?;
            writer
                .into_inner()
                .sync_all()
                .await
                .map_err(|e| PusnasError::write_error(&partial, e))?;

            fs::rename(&partial, staged)
                .await
                .map_err(|e| PusnasError::write_error(staged, e))
        }
        .await;

        if let Err(e) = result {
            FileManager::remove_quietly(&partial).await;
            return Err(e);
        }

        info!(
            path = %staged.display(),
            bytes = progress.bytes_received(),
            "download complete"
        );
        on_progress(progress.finished());
        Ok(())
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> PusnasError {
    let transient = e.is_timeout() || e.is_connect() || e.is_body() || e.is_request();
    PusnasError::network_error(
        format!("Fetching {} failed: {}", redact_query(url), e.without_url()),
        transient,
    )
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Download URLs carry signed query strings; keep them out of logs and errors
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::progress_channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every request with the same response
    async fn serve(status: &'static str, body: Vec<u8>, with_length: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let mut request = Vec::new();
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
                    if with_length {
                        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
                    }
                    head.push_str("\r\n");
                    let _ = socket.write_all(head.as_bytes()).await;
                    for chunk in body.chunks(1000) {
                        let _ = socket.write_all(chunk).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn fetcher(dir: &Path) -> ContentFetcher {
        ContentFetcher::with_client(
            Client::builder().no_proxy().build().unwrap(),
            dir.join("temp"),
        )
    }

    #[tokio::test]
    async fn test_fetch_streams_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let (base, hits) = serve("200 OK", body.clone(), true).await;
        let (callback, mut rx) = progress_channel();

        let staged = fetcher(dir.path())
            .fetch(&format!("{}/files/123.PDF?sig=x", base), "Buku Saya", &callback)
            .await
            .unwrap();

        assert_eq!(staged, dir.path().join("temp").join("Buku_Saya.pdf"));
        assert_eq!(fs::read(&staged).await.unwrap(), body);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(callback);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.first().unwrap().percentage, 0);
        assert!(events.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert_eq!(events.iter().filter(|e| e.percentage == 100).count(), 1);
        assert_eq!(events.last().unwrap().status, "Download successful.");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let (base, hits) = serve("200 OK", b"fresh".to_vec(), true).await;
        let fetcher = fetcher(dir.path());
        let url = format!("{}/files/book.mdrm", base);

        fs::create_dir_all(fetcher.staging_dir()).await.unwrap();
        fs::write(fetcher.staging_dir().join("Cached.mdrm"), b"old").await.unwrap();

        let (callback, mut rx) = progress_channel();
        let staged = fetcher.fetch(&url, "Cached", &callback).await.unwrap();
        drop(callback);

        assert_eq!(fs::read(&staged).await.unwrap(), b"old");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.percentage, 100);
        assert_eq!(event.status, "File already in cache.");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_length_only_reports_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = serve("200 OK", vec![7u8; 5000], false).await;
        let (callback, mut rx) = progress_channel();

        let staged = fetcher(dir.path())
            .fetch_with_default_ext(&format!("{}/dl", base), "NoLength", "epub", &callback)
            .await
            .unwrap();
        drop(callback);

        assert_eq!(staged.file_name().unwrap(), "NoLength.epub");
        assert_eq!(fs::read(&staged).await.unwrap().len(), 5000);
        let percentages: Vec<u8> = {
            let mut v = Vec::new();
            while let Some(e) = rx.recv().await {
                v.push(e.percentage);
            }
            v
        };
        assert_eq!(percentages, vec![0, 100]);
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = serve("503 Service Unavailable", b"busy".to_vec(), true).await;
        let fetcher = fetcher(dir.path());

        let err = fetcher
            .fetch(&format!("{}/files/a.pdf", base), "A", &crate::download::progress::noop())
            .await
            .unwrap_err();

        assert!(matches!(err, PusnasError::NetworkError { is_transient: true, .. }));
        assert!(!fetcher.staging_dir().join("A.pdf").exists());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(dir.path())
            .fetch(&format!("http://{}/a.pdf", addr), "A", &crate::download::progress::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, PusnasError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn test_malformed_url_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());

        let err = fetcher
            .fetch("not a url", "Book", &crate::download::progress::noop())
            .await
            .unwrap_err();

        assert!(matches!(err, PusnasError::NetworkError { is_transient: false, .. }));
        assert!(!dir.path().join("temp").join("Book.pdf").exists());
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("https://x/a.pdf?token=1"), "https://x/a.pdf");
        assert_eq!(redact_query("https://x/a.pdf"), "https://x/a.pdf");
    }
}
