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


//! Acquisition orchestration
//!
//! # Flow of one `acquire`
//! 1. Validate the book id and resolve the session
//! 2. Look up book detail and borrow authorization
//! 3. Return early if the book folder already holds a `_decrypted` result
//! 4. Fetch the artifact into staging (cached by title)
//! 5. Without DRM: move the staged file into place
//! 6. With DRM: derive secrets, unwrap wrapped containers, strip PDF
//!    passwords, then move the plaintext into place
//!
//! The result name is only ever created by a rename of a complete file, so
//! an interrupted run leaves nothing that step 3 would mistake for a result.
//! Failures after step 2 come back as `PusnasError::Pipeline` tagged with
//! their stage.

use crate::api::{CatalogService, SessionProvider};
use crate::config::AppConfig;
use crate::crypto::container::ContainerUnwrapper;
use crate::crypto::keys::{DerivationInput, KeyDeriver};
use crate::crypto::pdf::{PasswordRemover, QpdfRemover};
use crate::download::progress::{ProgressCallback, ProgressEvent, ProgressStage};
use crate::download::stream::ContentFetcher;
use crate::error::{PipelineStage, PusnasError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::{
    extension_of, partial_path, result_filename, safe_name, validate_book_id, LibraryLayout,
    DEFAULT_EXTENSION,
};
use crate::models::{BookIdentity, BorrowGrant};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Finished book on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquiredBook {
    pub path: PathBuf,
    pub filename: String,
}

impl AcquiredBook {
    fn from_path(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, filename }
    }
}

/// Runs the acquisition pipeline
pub struct AcquisitionManager {
    session: Arc<dyn SessionProvider>,
    catalog: Arc<dyn CatalogService>,
    deriver: Arc<dyn KeyDeriver>,
    remover: Arc<dyn PasswordRemover>,
    fetcher: ContentFetcher,
    unwrapper: ContainerUnwrapper,
    layout: LibraryLayout,
    config: AppConfig,
}

impl AcquisitionManager {
    /// Create a manager using qpdf for PDF password removal.
    ///
    /// `deriver` is the key derivation scheme for DRM books. Pass
    /// [`UnconfiguredDeriver`](crate::crypto::keys::UnconfiguredDeriver) to
    /// handle non-DRM books only.
    pub fn new(
        config: &AppConfig,
        session: Arc<dyn SessionProvider>,
        catalog: Arc<dyn CatalogService>,
        deriver: Arc<dyn KeyDeriver>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            session,
            catalog,
            deriver,
            remover: Arc::new(QpdfRemover::from_config(config)),
            fetcher: ContentFetcher::new(config)?,
            unwrapper: ContainerUnwrapper::new(config.staging_dir.clone()),
            layout: LibraryLayout::new(config.staging_dir.clone(), config.books_dir.clone()),
            config: config.clone(),
        })
    }

    /// Replace the PDF password remover
    pub fn with_password_remover(mut self, remover: Arc<dyn PasswordRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Replace the fetcher (custom HTTP client)
    pub fn with_fetcher(mut self, fetcher: ContentFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    /// Acquire one book and return its result file
    pub async fn acquire(&self, book_id: &str, on_progress: &ProgressCallback) -> Result<AcquiredBook> {
        validate_book_id(book_id)?;

        let session = self.session.session().await?.ok_or_else(|| {
            PusnasError::NotAuthenticated("Token not found. Please log in first.".to_string())
        })?;

        let detail = self
            .catalog
            .book_detail(&session, book_id)
            .await
            .map_err(|e| as_upstream(e, "book detail"))?;
        let authorization = self
            .catalog
            .borrow_authorization(&session, &detail.id)
            .await
            .map_err(|e| as_upstream(e, "borrow authorization"))?;

        let identity = BookIdentity::new(&session, &detail, &authorization);
        let grant = BorrowGrant::new(&detail, &authorization);
        info!(book_id = %identity.book_id, title = %identity.title, uses_drm = grant.uses_drm, "acquiring book");

        let safe = safe_name(&identity.title);
        let folder = self.layout.book_folder(&safe);
        FileManager::ensure_directory_exists(&folder)
            .await
            .map_err(|e| e.in_stage(PipelineStage::Finalize))?;

        if let Some(existing) = self
            .layout
            .find_result(&folder)
            .await
            .map_err(|e| e.in_stage(PipelineStage::Finalize))?
        {
            let book = AcquiredBook::from_path(existing);
            info!(path = %book.path.display(), "book already available");
            on_progress(
                ProgressEvent::done(ProgressStage::Complete, "Content already available.")
                    .with_filename(&book.filename),
            );
            return Ok(book);
        }

        let default_ext = grant
            .declared_extension
            .as_deref()
            .unwrap_or(DEFAULT_EXTENSION);
        let staged = self
            .fetcher
            .fetch_with_default_ext(&grant.file_url, &identity.title, default_ext, on_progress)
            .await
            .map_err(|e| e.in_stage(PipelineStage::Fetch))?;

        let book = if grant.uses_drm {
            self.unlock(&identity, &grant, &staged, &folder, &safe, on_progress)
                .await?
        } else {
            let ext = extension_of(&staged).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
            let destination = folder.join(result_filename(&safe, &ext));
            FileManager::move_file(&staged, &destination)
                .await
                .map_err(|e| e.in_stage(PipelineStage::Finalize))?;
            AcquiredBook::from_path(destination)
        };

        info!(book_id = %identity.book_id, path = %book.path.display(), "book ready");
        on_progress(
            ProgressEvent::done(ProgressStage::Complete, "Book ready.").with_filename(&book.filename),
        );
        Ok(book)
    }

    async fn unlock(
        &self,
        identity: &BookIdentity,
        grant: &BorrowGrant,
        staged: &Path,
        folder: &Path,
        safe: &str,
        on_progress: &ProgressCallback,
    ) -> Result<AcquiredBook> {
        on_progress(ProgressEvent::done(
            ProgressStage::Deriving,
            "Extracting DRM credentials...",
        ));
        let secrets = self
            .deriver
            .derive(&DerivationInput::new(identity, &grant.borrow_key))
            .map_err(|e| e.in_stage(PipelineStage::Derive))?;
        debug!(book_id = %identity.book_id, "secrets derived");

        let staged_ext = extension_of(staged).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let target = if self.config.is_wrapped_extension(&staged_ext) {
            on_progress(ProgressEvent::done(
                ProgressStage::Unwrapping,
                "Unlocking container...",
            ));
            self.unwrapper
                .unwrap_container(staged, &secrets.container_password, &identity.book_id)
                .await
                .map_err(|e| e.in_stage(PipelineStage::Unwrap))?
        } else {
            staged.to_path_buf()
        };

        let target_ext = extension_of(&target).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let final_path = folder.join(result_filename(safe, &target_ext));

        if target_ext == "pdf" {
            on_progress(ProgressEvent::done(
                ProgressStage::Decrypting,
                "Removing PDF protection...",
            ));
            let temp = partial_path(&self.layout.staging_dir().join(result_filename(safe, "pdf")));
            self.remover
                .remove_password(&target, &secrets.pdf_password, &temp, on_progress)
                .await
                .map_err(|e| e.in_stage(PipelineStage::Decrypt))?;

            if let Err(e) = FileManager::move_file(&temp, &final_path).await {
                FileManager::remove_quietly(&temp).await;
                return Err(e.in_stage(PipelineStage::Finalize));
            }
        } else {
            FileManager::move_file(&target, &final_path)
                .await
                .map_err(|e| e.in_stage(PipelineStage::Finalize))?;
        }

        Ok(AcquiredBook::from_path(final_path))
    }

    /// Acquire several books, at most `max_concurrent_books` at a time.
    ///
    /// Duplicate ids are acquired once. Results come back in first-seen order;
    /// `progress_for` supplies the callback for each id.
    pub async fn acquire_many<F>(
        &self,
        book_ids: &[String],
        progress_for: F,
    ) -> Vec<(String, Result<AcquiredBook>)>
    where
        F: Fn(&str) -> ProgressCallback,
    {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = book_ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        if unique.len() < book_ids.len() {
            debug!(skipped = book_ids.len() - unique.len(), "dropped duplicate book ids");
        }

        let semaphore = Semaphore::new(self.config.max_concurrent_books.max(1));
        let tasks = unique.into_iter().map(|book_id| {
            let on_progress = progress_for(book_id);
            let semaphore = &semaphore;
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.acquire(book_id, &on_progress).await,
                    Err(e) => Err(PusnasError::internal(format!("Semaphore closed: {}", e))),
                };
                if let Err(e) = &result {
                    warn!(book_id = %book_id, error = %e, "acquisition failed");
                }
                (book_id.clone(), result)
            }
        });

        futures_util::future::join_all(tasks).await
    }
}

/// Catalog failures always surface as `UpstreamError` (or `NotAuthenticated`)
fn as_upstream(err: PusnasError, what: &str) -> PusnasError {
    match err {
        e @ (PusnasError::UpstreamError { .. } | PusnasError::NotAuthenticated(_)) => e,
        other => PusnasError::upstream(format!("{} lookup failed: {}", what, other), None, None),
    }
}
