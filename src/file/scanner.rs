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


//! Local library index
//!
//! Lists the books already present under the books directory, marks which
//! borrowed books are local, and removes book folders.

use crate::api::BorrowedBook;
use crate::error::{PusnasError, Result};
use crate::file::paths::{is_result_filename, safe_name};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File format of a local book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookFormat {
    Pdf,
    Epub,
}

impl BookFormat {
    fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".epub") {
            Some(Self::Epub)
        } else {
            None
        }
    }
}

/// A book found in the books directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBook {
    /// Folder name (the sanitized title)
    pub id: String,
    /// Folder name with underscores shown as spaces
    pub title: String,
    pub filename: String,
    pub path: PathBuf,
    pub format: BookFormat,
}

/// A borrowed book annotated with its local copy, if any
#[derive(Debug, Clone, Serialize)]
pub struct ShelfEntry {
    #[serde(flatten)]
    pub book: BorrowedBook,
    pub is_local: bool,
    /// Local folder name, or the folder name a download would use
    pub safe_name: String,
    pub local_filename: Option<String>,
    pub local_format: Option<BookFormat>,
}

/// Library scanner over one books directory
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    books_dir: PathBuf,
}

impl LibraryScanner {
    pub fn new(books_dir: impl Into<PathBuf>) -> Self {
        Self {
            books_dir: books_dir.into(),
        }
    }

    /// List local books, sorted by folder name.
    ///
    /// In each folder a `_decrypted` PDF or EPUB wins; otherwise any PDF or
    /// EPUB counts. Folders with neither are skipped. A missing books
    /// directory is an empty library.
    pub async fn scan(&self) -> Result<Vec<LocalBook>> {
        let mut entries = match fs::read_dir(&self.books_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut books = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(folder_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let files = list_files(&entry.path()).await?;
            if let Some(filename) = pick_book_file(&files) {
                let format = match BookFormat::from_filename(&filename) {
                    Some(format) => format,
                    None => continue,
                };
                books.push(LocalBook {
                    title: folder_name.replace('_', " "),
                    path: entry.path().join(&filename),
                    id: folder_name,
                    filename,
                    format,
                });
            }
        }

        books.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(count = books.len(), dir = %self.books_dir.display(), "scanned library");
        Ok(books)
    }

    /// Annotate borrowed books with the local copies in `local`.
    ///
    /// Titles and folder names are compared loosely: lowercase, every run of
    /// non-alphanumerics treated as one separator.
    pub fn match_shelf(shelf: Vec<BorrowedBook>, local: &[LocalBook]) -> Vec<ShelfEntry> {
        shelf
            .into_iter()
            .map(|book| {
                let key = normalize_title(&book.book_title);
                let found = local.iter().find(|lb| normalize_title(&lb.id) == key);
                ShelfEntry {
                    is_local: found.is_some(),
                    safe_name: found
                        .map(|lb| lb.id.clone())
                        .unwrap_or_else(|| safe_name(&book.book_title)),
                    local_filename: found.map(|lb| lb.filename.clone()),
                    local_format: found.map(|lb| lb.format),
                    book,
                }
            })
            .collect()
    }

    /// Delete a book folder. Returns `false` if it did not exist.
    ///
    /// `folder_name` must be a single plain path component inside the books
    /// directory.
    pub async fn remove_book(&self, folder_name: &str) -> Result<bool> {
        let folder = self.checked_folder(folder_name)?;

        match fs::metadata(&folder).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(PusnasError::invalid_input(format!(
                    "Not a book folder: {}",
                    folder_name
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let root = fs::canonicalize(&self.books_dir).await?;
        let resolved = fs::canonicalize(&folder).await?;
        if !resolved.starts_with(&root) || resolved == root {
            return Err(PusnasError::invalid_input(format!(
                "Folder escapes the library: {}",
                folder_name
            )));
        }

        fs::remove_dir_all(&resolved)
            .await
            .map_err(|e| PusnasError::write_error(&resolved, e))?;
        info!(folder = %folder_name, "removed book");
        Ok(true)
    }

    fn checked_folder(&self, folder_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(folder_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.books_dir.join(folder_name)),
            _ => Err(PusnasError::invalid_input(format!(
                "Invalid folder name: {:?}",
                folder_name
            ))),
        }
    }
}

async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn pick_book_file(files: &[String]) -> Option<String> {
    let readable = |name: &&String| BookFormat::from_filename(name).is_some() && !name.starts_with('.');
    files
        .iter()
        .filter(readable)
        .find(|name| is_result_filename(name))
        .or_else(|| files.iter().find(readable))
        .cloned()
}

fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
