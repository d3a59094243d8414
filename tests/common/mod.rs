//! Shared fixtures for pipeline tests: stub session and catalog, a local
//! file server, zip containers, and password removers.

#![allow(dead_code)]

use async_trait::async_trait;
use ipusnas_core::api::{BookDetail, BorrowAuthorization, CatalogService, Session, SessionProvider};
use ipusnas_core::crypto::{DerivationInput, DerivedSecrets, FixtureDeriver, KeyDeriver, PasswordRemover};
use ipusnas_core::download::progress::{ProgressCallback, ProgressEvent, ProgressStage};
use ipusnas_core::{AcquisitionManager, AppConfig, BookIdentity, ContentFetcher, PusnasError, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zip::unstable::write::FileOptionsExt;

pub const USER_ID: &str = "user-1";
pub const PARTNER_ID: &str = "epustaka-9";
pub const BORROW_KEY: &str = "borrow-key-abc";

pub struct StubSession;

#[async_trait]
impl SessionProvider for StubSession {
    async fn session(&self) -> Result<Option<Session>> {
        Ok(Some(Session::new("token", USER_ID)))
    }
}

/// Catalog serving one book
pub struct StubCatalog {
    pub detail: BookDetail,
    pub file_url: String,
    pub calls: AtomicUsize,
}

impl StubCatalog {
    pub fn new(book_id: &str, title: &str, uses_drm: bool, file_url: String) -> Self {
        Self {
            detail: BookDetail {
                id: book_id.to_string(),
                title: title.to_string(),
                uses_drm,
                file_ext: None,
            },
            file_url,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CatalogService for StubCatalog {
    async fn book_detail(&self, _session: &Session, _book_id: &str) -> Result<BookDetail> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detail.clone())
    }

    async fn borrow_authorization(
        &self,
        _session: &Session,
        _book_id: &str,
    ) -> Result<BorrowAuthorization> {
        Ok(BorrowAuthorization {
            file_url: self.file_url.clone(),
            borrow_key: BORROW_KEY.to_string(),
            library_partner_id: PARTNER_ID.to_string(),
        })
    }
}

/// Secrets the default deriver produces for `book_id`
pub fn secrets_for(book_id: &str) -> DerivedSecrets {
    let identity = BookIdentity {
        book_id: book_id.to_string(),
        title: String::new(),
        user_id: USER_ID.to_string(),
        library_partner_id: PARTNER_ID.to_string(),
    };
    FixtureDeriver
        .derive(&DerivationInput::new(&identity, BORROW_KEY))
        .unwrap()
}

/// Local HTTP server with fixed files; counts requests per path
pub struct FileServer {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl FileServer {
    pub async fn start(files: Vec<(&str, Vec<u8>)>) -> Self {
        let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
            files
                .into_iter()
                .map(|(path, body)| (path.to_string(), body))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let seen = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let files = files.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let mut raw = Vec::new();
                    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => raw.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&raw).into_owned();
                    let target = head.split_whitespace().nth(1).unwrap_or("/");
                    let path = target.split('?').next().unwrap_or(target).to_string();
                    *seen.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

                    let (status, body) = match files.get(&path) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", b"missing".to_vec()),
                    };
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    for chunk in body.chunks(512) {
                        let _ = socket.write_all(chunk).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base_url, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

/// Password remover that checks the password and copies the input
pub struct CopyRemover {
    pub expected_password: String,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl CopyRemover {
    pub fn new(expected_password: &str) -> Self {
        Self {
            expected_password: expected_password.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            expected_password: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PasswordRemover for CopyRemover {
    async fn remove_password(
        &self,
        input: &Path,
        password: &str,
        output: &Path,
        on_progress: &ProgressCallback,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail || password != self.expected_password {
            return Err(PusnasError::ToolFailed {
                exit_code: Some(2),
                diagnostic: "invalid password".to_string(),
            });
        }
        tokio::fs::copy(input, output).await?;
        tokio::fs::remove_file(input).await?;
        on_progress(ProgressEvent::done(ProgressStage::Decrypting, "Decryption complete."));
        Ok(())
    }
}

/// Build a ZipCrypto container; entries are `(name, data, password)`
pub fn zip_container(entries: &[(&str, &[u8], Option<&str>)]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, data, password) in entries {
            let mut options = SimpleFileOptions::default();
            if let Some(password) = password {
                options = options.with_deprecated_encryption(password.as_bytes());
            }
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Entry names and contents of a zip file
pub fn zip_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

pub fn test_config(root: &Path) -> AppConfig {
    AppConfig::builder().data_dir(root).build()
}

/// Manager wired to the stubs, the fixture deriver, a proxy-free HTTP
/// client and `remover`
pub fn manager(
    config: &AppConfig,
    catalog: Arc<StubCatalog>,
    remover: Arc<dyn PasswordRemover>,
) -> AcquisitionManager {
    manager_with_deriver(config, catalog, remover, Arc::new(FixtureDeriver))
}

pub fn manager_with_deriver(
    config: &AppConfig,
    catalog: Arc<StubCatalog>,
    remover: Arc<dyn PasswordRemover>,
    deriver: Arc<dyn KeyDeriver>,
) -> AcquisitionManager {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    AcquisitionManager::new(config, Arc::new(StubSession), catalog, deriver)
        .unwrap()
        .with_fetcher(ContentFetcher::with_client(client, config.staging_dir.clone()))
        .with_password_remover(remover)
}

/// Names of regular files directly inside `dir` (empty if missing)
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Write an executable shell script standing in for qpdf
#[cfg(unix)]
pub fn fake_qpdf(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-qpdf.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
