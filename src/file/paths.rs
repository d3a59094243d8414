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


//! Naming and directory layout
//!
//! # Layout
//! ```text
//! <staging_dir>/<safe_title><ext>              staged download (cache key)
//! <staging_dir>/<book_id>.epub|.pdf            unwrapped container payload
//! <books_dir>/<safe_title>/<safe_title>_decrypted.<ext>   result artifact
//! ```
//!
//! A result folder is complete once it holds a file whose stem ends with
//! `_decrypted`. Files are only ever renamed onto that name after they are
//! fully written, so the name alone is the idempotency marker.

use crate::error::{PusnasError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Maximum length of a sanitized name in bytes (names are ASCII)
pub const MAX_SAFE_NAME_LENGTH: usize = 200;

/// Name used when a title sanitizes to nothing usable
pub const UNKNOWN_BOOK_NAME: &str = "unknown_book";

/// Suffix marking a fully processed result file
pub const DECRYPTED_SUFFIX: &str = "_decrypted";

/// Extension used when nothing better is known
pub const DEFAULT_EXTENSION: &str = "pdf";

/// Preference order when more than one result-like file is present
const RESULT_EXTENSION_PRIORITY: [&str; 2] = ["pdf", "epub"];

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-.]").unwrap();
    static ref UNDERSCORE_RUNS: Regex = Regex::new(r"_+").unwrap();
    static ref DOT_RUNS: Regex = Regex::new(r"\.{2,}").unwrap();
    static ref BOOK_ID: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
}

/// Sanitize a book title into a file/folder name.
///
/// Every character outside `[A-Za-z0-9_.-]` becomes `_`, runs of `_` collapse,
/// runs of dots become `_` (no `..` components), and the result is capped at
/// [`MAX_SAFE_NAME_LENGTH`] bytes. Same input always gives the same output.
pub fn safe_name(title: &str) -> String {
    let trimmed = title.trim();
    let replaced = UNSAFE_CHARS.replace_all(trimmed, "_");
    let no_dot_runs = DOT_RUNS.replace_all(&replaced, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&no_dot_runs, "_");

    // ASCII only at this point, so byte truncation is char-safe
    let mut name = collapsed.into_owned();
    name.truncate(MAX_SAFE_NAME_LENGTH);

    if name.is_empty() || name == "." {
        return UNKNOWN_BOOK_NAME.to_string();
    }
    name
}

/// Check that a book id is a plain identifier (`[A-Za-z0-9_-]+`)
pub fn validate_book_id(book_id: &str) -> Result<()> {
    if BOOK_ID.is_match(book_id) {
        Ok(())
    } else {
        Err(PusnasError::invalid_input(format!(
            "Invalid book ID: {:?}",
            book_id
        )))
    }
}

/// Lowercased extension of a path without the dot, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Extension of the last segment of a URL path, lowercased, without the dot
pub fn extension_from_url(url: &str) -> Result<Option<String>> {
    let parsed = url::Url::parse(url)
        .map_err(|e| PusnasError::invalid_input(format!("Invalid download URL {}: {}", url, e)))?;

    let last_segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    Ok(extension_of(Path::new(last_segment)))
}

/// `<safe>_decrypted.<ext>`
pub fn result_filename(safe: &str, ext: &str) -> String {
    format!("{}{}.{}", safe, DECRYPTED_SUFFIX, ext.trim_start_matches('.'))
}

/// Whether a file name is a completed result artifact
pub fn is_result_filename(name: &str) -> bool {
    let path = Path::new(name);
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    stem.ends_with(DECRYPTED_SUFFIX) && extension_of(path).is_some()
}

/// Pick the canonical result file out of a folder listing.
///
/// PDF wins over EPUB, then anything else in name order.
pub fn pick_result_file<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates: Vec<&str> = names.into_iter().filter(|n| is_result_filename(n)).collect();
    candidates.sort_by_key(|name| {
        let ext = extension_of(Path::new(name)).unwrap_or_default();
        let rank = RESULT_EXTENSION_PRIORITY
            .iter()
            .position(|p| *p == ext)
            .unwrap_or(RESULT_EXTENSION_PRIORITY.len());
        (rank, name.to_string())
    });
    candidates.first().map(|s| s.to_string())
}

/// Staging and result directories of one installation
#[derive(Debug, Clone)]
pub struct LibraryLayout {
    staging_dir: PathBuf,
    books_dir: PathBuf,
}

impl LibraryLayout {
    pub fn new(staging_dir: PathBuf, books_dir: PathBuf) -> Self {
        Self {
            staging_dir,
            books_dir,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn books_dir(&self) -> &Path {
        &self.books_dir
    }

    /// Create both directories if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.staging_dir, &self.books_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PusnasError::write_error(dir, e))?;
        }
        Ok(())
    }

    /// Result folder for a sanitized title
    pub fn book_folder(&self, safe: &str) -> PathBuf {
        self.books_dir.join(safe)
    }

    /// Staged download path for a title and extension
    pub fn staged_path(&self, target_name: &str, ext: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", safe_name(target_name), ext.trim_start_matches('.')))
    }

    /// Intermediate file named after the book id
    pub fn intermediate_path(&self, book_id: &str, ext: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", book_id, ext.trim_start_matches('.')))
    }

    /// Completed result in a book folder, if there is one
    pub async fn find_result(&self, folder: &Path) -> Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        Ok(pick_result_file(names.iter().map(String::as_str)).map(|name| folder.join(name)))
    }
}

/// Unique sibling path for writing before an atomic rename onto `path`
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    path.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_name_basic() {
        assert_eq!(safe_name("Laskar Pelangi"), "Laskar_Pelangi");
        assert_eq!(safe_name("  Bumi: Manusia!  "), "Bumi_Manusia_");
        assert_eq!(safe_name("a -- b"), "a_--_b");
        assert_eq!(safe_name("v1.2"), "v1.2");
    }

    #[test]
    fn test_safe_name_collapses_and_blocks_traversal() {
        assert_eq!(safe_name("a   b"), "a_b");
        assert_eq!(safe_name("../../etc/passwd"), "_etc_passwd");
        assert_eq!(safe_name(".."), "_");
        assert_eq!(safe_name("."), UNKNOWN_BOOK_NAME);
        assert_eq!(safe_name("   "), UNKNOWN_BOOK_NAME);
    }

    #[test]
    fn test_safe_name_character_class_and_cap() {
        let titles = [
            "Sejarah Indonesia Modern 1200–2008",
            "日本語のタイトル",
            &"Panjang ".repeat(80),
            "file\0with\ncontrol",
        ];
        for title in titles {
            let name = safe_name(title);
            assert!(name.len() <= MAX_SAFE_NAME_LENGTH, "{}", name);
            assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')));
            assert!(!name.contains(".."));
            assert_eq!(name, safe_name(title));
        }
    }

    #[test]
    fn test_validate_book_id() {
        assert!(validate_book_id("9f3c-22_ab").is_ok());
        assert!(validate_book_id("").is_err());
        assert!(validate_book_id("../1").is_err());
        assert!(validate_book_id("1 2").is_err());
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://cdn.example.com/files/123.MDRM?sig=abc").unwrap(),
            Some("mdrm".to_string())
        );
        assert_eq!(
            extension_from_url("https://cdn.example.com/files/123").unwrap(),
            None
        );
        assert_eq!(extension_from_url("https://cdn.example.com/").unwrap(), None);
        assert!(extension_from_url("not a url").is_err());
    }

    #[test]
    fn test_result_filename_detection() {
        assert_eq!(result_filename("Book", ".pdf"), "Book_decrypted.pdf");
        assert!(is_result_filename("Book_decrypted.pdf"));
        assert!(is_result_filename("Book_decrypted.epub"));
        assert!(!is_result_filename("Book.pdf"));
        assert!(!is_result_filename("Book_decrypted"));
        assert!(!is_result_filename(".Book_decrypted.pdf.1234.part"));
    }

    #[test]
    fn test_pick_result_prefers_pdf() {
        let names = ["cover.jpg", "B_decrypted.epub", "B_decrypted.pdf"];
        assert_eq!(
            pick_result_file(names.iter().copied()),
            Some("B_decrypted.pdf".to_string())
        );
        assert_eq!(pick_result_file(["B.pdf"].iter().copied()), None);
    }

    #[tokio::test]
    async fn test_find_result_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LibraryLayout::new(dir.path().join("temp"), dir.path().join("books"));
        let folder = layout.book_folder("Book");

        assert_eq!(layout.find_result(&folder).await.unwrap(), None);

        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("Book.pdf"), b"x").await.unwrap();
        assert_eq!(layout.find_result(&folder).await.unwrap(), None);

        tokio::fs::write(folder.join("Book_decrypted.epub"), b"x").await.unwrap();
        assert_eq!(
            layout.find_result(&folder).await.unwrap(),
            Some(folder.join("Book_decrypted.epub"))
        );
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let target = Path::new("/tmp/stage/Book.pdf");
        let partial = partial_path(target);
        assert_eq!(partial.parent(), target.parent());
        let name = partial.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".Book.pdf."));
        assert!(name.ends_with(".part"));
        assert!(!is_result_filename(name));
    }
}
