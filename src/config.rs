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


//! Runtime configuration
//!
//! Settings come from three layers, later ones winning:
//! 1. Built-in defaults (platform data directory, public API host)
//! 2. An optional JSON file (`AppConfig::load`)
//! 3. `IPUSNAS_*` environment variables
//!
//! # Environment Variables
//! - `IPUSNAS_BOOKS_DIR` - result directory (one folder per book)
//! - `IPUSNAS_STAGING_DIR` - in-flight downloads
//! - `IPUSNAS_TOKEN_PATH` - saved session token
//! - `IPUSNAS_QPDF_PATH` - qpdf binary
//! - `IPUSNAS_API_BASE_URL` - catalog API host

use crate::error::{PusnasError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public iPusnas API host
pub const DEFAULT_API_BASE_URL: &str = "https://api2-ipusnas.perpusnas.go.id";

/// Default request timeout for catalog calls in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a whole artifact download in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;

/// Default number of books processed at once by `acquire_many`
const DEFAULT_MAX_CONCURRENT_BOOKS: usize = 2;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Results directory; holds one sub-folder per book
    pub books_dir: PathBuf,

    /// Staging directory for downloads and intermediate files
    pub staging_dir: PathBuf,

    /// Where the session token is stored
    pub token_path: PathBuf,

    /// Password-removal tool binary
    pub qpdf_path: PathBuf,

    /// Catalog API base URL (no trailing slash)
    pub api_base_url: String,

    /// User-Agent sent with every request
    pub user_agent: String,

    /// Timeout for catalog requests
    pub request_timeout_secs: u64,

    /// Timeout for artifact downloads
    pub download_timeout_secs: u64,

    /// Extensions (without dot) of password-protected zip containers
    pub wrapped_extensions: Vec<String>,

    /// Concurrency limit for batch acquisition
    pub max_concurrent_books: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = get_default_data_dir();
        Self {
            books_dir: data_dir.join("books"),
            staging_dir: data_dir.join("temp"),
            token_path: data_dir.join("token.json"),
            qpdf_path: default_qpdf_path(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: format!("ipusnas-core/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            wrapped_extensions: vec!["mdrm".to_string()],
            max_concurrent_books: DEFAULT_MAX_CONCURRENT_BOOKS,
        }
    }
}

impl AppConfig {
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::new()
    }

    /// Load configuration from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            PusnasError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            PusnasError::ConfigurationError(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Apply `IPUSNAS_*` overrides using the given variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("IPUSNAS_BOOKS_DIR") {
            self.books_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("IPUSNAS_STAGING_DIR") {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("IPUSNAS_TOKEN_PATH") {
            self.token_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("IPUSNAS_QPDF_PATH") {
            self.qpdf_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("IPUSNAS_API_BASE_URL") {
            self.api_base_url = url;
        }
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.books_dir == self.staging_dir {
            return Err(PusnasError::ConfigurationError(
                "books_dir and staging_dir must be different directories".to_string(),
            ));
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(PusnasError::ConfigurationError(format!(
                "api_base_url is not a valid URL: {}",
                self.api_base_url
            )));
        }
        if self.max_concurrent_books == 0 {
            return Err(PusnasError::ConfigurationError(
                "max_concurrent_books must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Whether `ext` (with or without leading dot) names a wrapped container
    pub fn is_wrapped_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.wrapped_extensions
            .iter()
            .any(|w| w.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Builder for AppConfig
#[derive(Debug)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Put books, staging and token under one root directory
    pub fn data_dir<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        self.config.books_dir = root.join("books");
        self.config.staging_dir = root.join("temp");
        self.config.token_path = root.join("token.json");
        self
    }

    pub fn books_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.books_dir = dir.into();
        self
    }

    pub fn staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn token_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.token_path = path.into();
        self
    }

    pub fn qpdf_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.qpdf_path = path.into();
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout_secs = timeout.as_secs();
        self
    }

    pub fn max_concurrent_books(mut self, limit: usize) -> Self {
        self.config.max_concurrent_books = limit;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Default qpdf location for the platform.
///
/// Windows installs ship `qpdf.exe` in a `bin` folder next to the executable;
/// everywhere else qpdf is resolved from `PATH`.
pub fn default_qpdf_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("bin").join("qpdf.exe")
    }

    #[cfg(not(target_os = "windows"))]
    {
        PathBuf::from("qpdf")
    }
}

/// Get default data directory for the platform
pub fn get_default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let mut path = PathBuf::from(home);
            path.push("Library");
            path.push("Application Support");
            path.push("iPusnas");
            return path;
        }
        return PathBuf::from("./ipusnas");
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(data_home) = std::env::var_os("XDG_DATA_HOME") {
            return PathBuf::from(data_home).join("ipusnas");
        }
        if let Some(home) = std::env::var_os("HOME") {
            let mut path = PathBuf::from(home);
            path.push(".local");
            path.push("share");
            path.push("ipusnas");
            return path;
        }
        return PathBuf::from("./ipusnas");
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            let mut path = PathBuf::from(appdata);
            path.push("iPusnas");
            return path;
        }
        return PathBuf::from("./ipusnas");
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("./ipusnas")
    }
}
