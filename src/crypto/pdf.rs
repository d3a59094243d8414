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


//! PDF password removal through qpdf
//!
//! # Command
//! ```text
//! qpdf --password=<pdf_password> --decrypt <input> <output>
//! ```
//!
//! stdout and stderr are captured in full and the process is awaited before
//! anything is decided. Any exit other than 0 is a failure (qpdf's "success
//! with warnings" code 3 included); whatever the tool left at `output` is
//! removed. On success the input is deleted.

use crate::config::AppConfig;
use crate::download::progress::{ProgressCallback, ProgressEvent, ProgressStage};
use crate::error::{PusnasError, Result};
use crate::file::manager::FileManager;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Removes the password protection of a PDF
#[async_trait]
pub trait PasswordRemover: Send + Sync {
    /// Write an unprotected copy of `input` to `output`
    async fn remove_password(
        &self,
        input: &Path,
        password: &str,
        output: &Path,
        on_progress: &ProgressCallback,
    ) -> Result<()>;
}

/// [`PasswordRemover`] backed by the qpdf binary
#[derive(Debug, Clone)]
pub struct QpdfRemover {
    binary: PathBuf,
}

impl QpdfRemover {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.qpdf_path.clone())
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check that the binary can be started
    ///
    /// # Errors
    /// - ToolNotFound if the binary does not exist
    pub async fn check_available(&self) -> Result<()> {
        match Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PusnasError::ToolNotFound {
                binary: self.binary.clone(),
            }),
            Err(e) => Err(PusnasError::internal(format!(
                "Failed to start {}: {}",
                self.binary.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl PasswordRemover for QpdfRemover {
    async fn remove_password(
        &self,
        input: &Path,
        password: &str,
        output: &Path,
        on_progress: &ProgressCallback,
    ) -> Result<()> {
        debug!(
            binary = %self.binary.display(),
            input = %input.display(),
            output = %output.display(),
            "running qpdf"
        );

        let mut cmd = build_qpdf_command(&self.binary, input, password, output);
        let result = match cmd.output().await {
            Ok(result) => result,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PusnasError::ToolNotFound {
                    binary: self.binary.clone(),
                });
            }
            Err(e) => {
                return Err(PusnasError::internal(format!(
                    "Failed to run {}: {}",
                    self.binary.display(),
                    e
                )));
            }
        };

        if !result.status.success() {
            FileManager::remove_quietly(output).await;
            let diagnostic = diagnostic_text(&result.stdout, &result.stderr);
            warn!(exit_code = ?result.status.code(), diagnostic = %diagnostic, "qpdf failed");
            return Err(PusnasError::ToolFailed {
                exit_code: result.status.code(),
                diagnostic,
            });
        }

        if !FileManager::file_exists(output).await {
            return Err(PusnasError::OutputMissing {
                path: output.to_path_buf(),
            });
        }

        FileManager::remove_quietly(input).await;
        info!(output = %output.display(), "pdf protection removed");
        on_progress(ProgressEvent::done(ProgressStage::Decrypting, "Decryption complete."));
        Ok(())
    }
}

/// Build the qpdf invocation
fn build_qpdf_command(binary: &Path, input: &Path, password: &str, output: &Path) -> Command {
    let mut cmd = Command::new(binary);

    cmd.arg(format!("--password={}", password))
        .arg("--decrypt")
        .arg(input)
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

/// stderr first, then stdout, trimmed
fn diagnostic_text(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = String::from_utf8_lossy(stdout);
    [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
