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


//! File operations for staged and result artifacts
//!
//! # Key Operations
//! - Move a finished artifact onto its final name (rename, or copy + rename
//!   across filesystems)
//! - Best-effort cleanup of intermediate files
//! - Atomic small-file writes (session token)
//!
//! A destination name is only ever created by a rename, never by writing into
//! it directly. Readers that see the name see the whole file.

use crate::error::{PusnasError, Result};
use crate::file::paths::partial_path;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// File manager for safe file operations
#[derive(Debug, Default, Clone, Copy)]
pub struct FileManager;

impl FileManager {
    /// Move `source` onto `destination`, creating the parent directory.
    ///
    /// # Algorithm
    /// 1. Create destination directory
    /// 2. Try `rename` (atomic on the same filesystem)
    /// 3. On failure copy into a hidden partial sibling, rename it into place,
    ///    then delete the source
    pub async fn move_file(source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            Self::ensure_directory_exists(parent).await?;
        }

        match fs::rename(source, destination).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PusnasError::write_error(
                    source,
                    format!("source vanished before move: {}", e),
                ));
            }
            Err(e) => {
                debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %e,
                    "rename failed, falling back to copy"
                );
            }
        }

        let partial = partial_path(destination);
        if let Err(e) = fs::copy(source, &partial).await {
            Self::remove_quietly(&partial).await;
            return Err(PusnasError::write_error(destination, e));
        }
        if let Err(e) = fs::rename(&partial, destination).await {
            Self::remove_quietly(&partial).await;
            return Err(PusnasError::write_error(destination, e));
        }

        Self::remove_quietly(source).await;
        Ok(())
    }

    /// Delete a file, logging instead of failing.
    ///
    /// Used for intermediates whose removal must not fail a finished run.
    pub async fn remove_quietly(path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
        }
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| PusnasError::write_error(path, e))
    }

    /// Check if file exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Atomic write: write to a partial sibling, sync, then rename
    pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
        Self::write_and_rename(path, contents, None).await
    }

    /// Atomic write of a file only the owner may read.
    ///
    /// On Unix the partial file is created with mode 0600, so the name never
    /// points at a file with wider permissions.
    pub async fn atomic_write_private(path: &Path, contents: &[u8]) -> Result<()> {
        Self::write_and_rename(path, contents, Some(0o600)).await
    }

    async fn write_and_rename(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_directory_exists(parent).await?;
        }

        let partial = partial_path(path);
        let result = async {
            let mut options = fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            if let Some(mode) = mode {
                options.mode(mode);
            }
            #[cfg(not(unix))]
            let _ = mode;

            let mut file = options.open(&partial).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, path).await
        }
        .await;

        if let Err(e) = result {
            Self::remove_quietly(&partial).await;
            return Err(PusnasError::write_error(path, e));
        }
        Ok(())
    }
}
